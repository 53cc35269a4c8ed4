//! `HashMap`-backed backend. The default for tests and for hosts that don't
//! need persistence; change notification is synchronous.

use std::collections::HashMap;

use async_trait::async_trait;
use pantograph_node_contracts::{validate, Row, Schema, Value};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::change::{ChangeEvent, ChangeSubscription, SubscribeOptions};
use crate::error::Result;
use crate::op::Op;
use crate::repository::{key_tuple, TabularRepository};

fn key_string(key: &[Value]) -> String {
    serde_json::to_string(key).unwrap_or_default()
}

struct Subscriber {
    options: SubscribeOptions,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct MemoryBackend {
    schema: Schema,
    primary_key: Vec<String>,
    rows: RwLock<HashMap<String, Row>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl MemoryBackend {
    pub fn new(schema: Schema, primary_key: Vec<String>) -> Self {
        Self {
            schema,
            primary_key,
            rows: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn notify(&self, event: ChangeEvent) {
        let row_for_filter = match &event {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => new,
            ChangeEvent::Delete { old } => old,
        };
        let mut subs = self.subscribers.write();
        subs.retain(|sub| {
            if !sub.options.row_matches(row_for_filter) {
                return true;
            }
            sub.sender.send(event.clone()).is_ok()
        });
    }

    fn put_one(&self, row: Row) -> Result<Option<ChangeEvent>> {
        validate(&self.schema, &row)?;
        let key = key_tuple(&self.primary_key, &row)?;
        let mut rows = self.rows.write();
        let previous = rows.insert(key_string(&key), row.clone());
        Ok(Some(match previous {
            Some(old) => ChangeEvent::Update { old, new: row },
            None => ChangeEvent::Insert { new: row },
        }))
    }
}

#[async_trait]
impl TabularRepository for MemoryBackend {
    fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    async fn put(&self, row: Row) -> Result<()> {
        if let Some(event) = self.put_one(row)? {
            self.notify(event);
        }
        Ok(())
    }

    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()> {
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(event) = self.put_one(row)? {
                events.push(event);
            }
        }
        for event in events {
            self.notify(event);
        }
        Ok(())
    }

    async fn get(&self, key: &[Value]) -> Result<Option<Row>> {
        Ok(self.rows.read().get(&key_string(key)).cloned())
    }

    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.get(field).map(|v| op.matches(v, value)).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn delete_by_key(&self, key: &[Value]) -> Result<()> {
        let removed = self.rows.write().remove(&key_string(key));
        if let Some(old) = removed {
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(())
    }

    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize> {
        let matching_keys: Vec<String> = self
            .rows
            .read()
            .iter()
            .filter(|(_, row)| row.get(field).map(|v| op.matches(v, value)).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();
        let mut removed = Vec::new();
        {
            let mut rows = self.rows.write();
            for key in &matching_keys {
                if let Some(old) = rows.remove(key) {
                    removed.push(old);
                }
            }
        }
        let count = removed.len();
        for old in removed {
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(count)
    }

    async fn delete_all(&self) -> Result<usize> {
        let removed: Vec<Row> = self.rows.write().drain().map(|(_, row)| row).collect();
        let count = removed.len();
        for old in removed {
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(count)
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>> {
        let rows = self.rows.read();
        Ok(match limit {
            Some(limit) => rows.values().take(limit).cloned().collect(),
            None => rows.values().cloned().collect(),
        })
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.rows.read().len())
    }

    async fn subscribe_to_changes(&self, options: SubscribeOptions) -> Result<ChangeSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.write().push(Subscriber { options, sender });
        Ok(ChangeSubscription { receiver })
    }
}
