//! A [`LimiterStore`] backed by any [`tabular_store::TabularRepository`], for
//! hosts that want rate-limiter budget to survive a process restart (§9
//! "Rate limiter persistence", taken).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use tabular_store::{Op, TabularRepository};

use crate::store::LimiterStore;

/// The schema a [`TabularLimiterStore`] expects its backend to have been
/// created with: one row per recorded execution, primary key `[queue, id]`.
pub fn schema() -> Schema {
    Schema::new(vec![
        FieldDescriptor::required("queue", FieldType::String),
        FieldDescriptor::required("id", FieldType::String),
        FieldDescriptor::required("recorded_at", FieldType::Timestamp),
    ])
}

pub fn primary_key() -> Vec<String> {
    vec!["queue".to_string(), "id".to_string()]
}

/// Persists execution timestamps through a `TabularRepository` created with
/// [`schema`]/[`primary_key`], so the sliding window survives a restart.
pub struct TabularLimiterStore<R: TabularRepository> {
    repository: R,
}

impl<R: TabularRepository> TabularLimiterStore<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: TabularRepository> LimiterStore for TabularLimiterStore<R> {
    async fn record_execution(&self, queue: &str, at: DateTime<Utc>) {
        let mut row = Row::new();
        row.insert("queue".into(), Value::String(queue.to_string()));
        row.insert("id".into(), Value::String(pantograph_runtime_identity::new_edge_id()));
        row.insert("recorded_at".into(), Value::Timestamp(at));
        // Persistence here is best-effort bookkeeping for the rate limiter,
        // not a correctness-critical write path; a failed write just means
        // this admission isn't counted against a future restart's budget.
        let _ = self.repository.put(row).await;
    }

    async fn recent_executions(&self, queue: &str, since: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let rows = match self.repository.search("queue", &Value::String(queue.to_string()), Op::Eq).await {
            Ok(rows) => rows,
            Err(_) => return Vec::new(),
        };
        let mut timestamps: Vec<DateTime<Utc>> = rows
            .into_iter()
            .filter_map(|row| match row.get("recorded_at") {
                Some(Value::Timestamp(ts)) if *ts >= since => Some(*ts),
                _ => None,
            })
            .collect();
        timestamps.sort();
        timestamps
    }
}
