use pantograph_node_contracts::Row;

/// A single change notification delivered to a change subscription.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert { new: Row },
    Update { old: Row, new: Row },
    Delete { old: Row },
}

/// Options controlling a `subscribe_to_changes` call.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Restrict notifications to rows where the named fields equal the
    /// given values. An empty filter receives every change.
    pub prefix_filter: Row,
    /// Polling interval for backends that do not have a native change feed.
    /// Ignored by backends with native/synchronous notification.
    pub polling_interval_ms: Option<u64>,
}

impl SubscribeOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_prefix_filter(mut self, filter: Row) -> Self {
        self.prefix_filter = filter;
        self
    }

    pub fn with_polling_interval_ms(mut self, ms: u64) -> Self {
        self.polling_interval_ms = Some(ms);
        self
    }

    pub(crate) fn row_matches(&self, row: &Row) -> bool {
        self.prefix_filter.iter().all(|(k, v)| row.get(k) == Some(v))
    }
}

/// A live handle to a change subscription. Dropping it (or its receiver)
/// unsubscribes.
pub struct ChangeSubscription {
    pub receiver: tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>,
}
