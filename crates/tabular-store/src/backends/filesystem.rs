//! Filesystem-directory backend: one JSON file per row under a directory,
//! named by a filename-safe encoding of the primary-key tuple. Change
//! notification is by polling the directory's mtimes, for hosts that want
//! durable storage without an embedded database.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use pantograph_node_contracts::{validate, Row, Schema, Value};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

use crate::change::{ChangeEvent, ChangeSubscription, SubscribeOptions};
use crate::error::Result;
use crate::op::Op;
use crate::repository::{key_tuple, TabularRepository};

const DEFAULT_POLL_MS: u64 = 500;

fn encode_key(key: &[Value]) -> String {
    let raw = serde_json::to_string(key).unwrap_or_default();
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub struct FilesystemBackend {
    schema: Schema,
    primary_key: Vec<String>,
    dir: PathBuf,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    subscriber_options: Mutex<Vec<SubscribeOptions>>,
}

impl FilesystemBackend {
    pub fn open(dir: impl Into<PathBuf>, schema: Schema, primary_key: Vec<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            schema,
            primary_key,
            dir,
            subscribers: Mutex::new(Vec::new()),
            subscriber_options: Mutex::new(Vec::new()),
        })
    }

    fn path_for(&self, key: &[Value]) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    fn read_row(path: &Path) -> Result<Option<Row>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn all_paths(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().map(|e| e == "json").unwrap_or(false) {
                out.push(entry.path());
            }
        }
        Ok(out)
    }

    fn notify(&self, event: ChangeEvent) {
        let row_for_filter = match &event {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => new,
            ChangeEvent::Delete { old } => old,
        };
        let options = self.subscriber_options.lock();
        let mut senders = self.subscribers.lock();
        let mut keep = Vec::with_capacity(senders.len());
        for (sender, opts) in senders.drain(..).zip(options.iter()) {
            if opts.row_matches(row_for_filter) && sender.send(event.clone()).is_err() {
                continue;
            }
            keep.push(sender);
        }
        *senders = keep;
    }

    /// Waits `interval`, then returns one [`ChangeEvent`] for every row file
    /// whose mtime advanced (or that newly appeared) since `since`, and one
    /// [`ChangeEvent::Delete`] for every path in `since` that no longer
    /// exists (looked up from `last_known`, since the file's content is gone
    /// by the time it's noticed missing). Intended to run on its own
    /// background task; the backend itself does not spawn one (its trait
    /// methods take `&self`), so a host that wants cross-process change
    /// observation on this backend drives this loop directly, feeding each
    /// call's returned mtime snapshot back in as the next call's `since`.
    pub async fn poll_for_changes(
        &self,
        interval: Duration,
        since: &HashMap<PathBuf, SystemTime>,
        last_known: &HashMap<PathBuf, Row>,
    ) -> Result<(Vec<ChangeEvent>, HashMap<PathBuf, SystemTime>)> {
        time::sleep(interval).await;
        let current_paths = self.all_paths()?;
        let mut snapshot = HashMap::new();
        let mut events = Vec::new();
        for path in &current_paths {
            let mtime = fs::metadata(path).ok().and_then(|m| m.modified().ok());
            if let Some(mtime) = mtime {
                snapshot.insert(path.clone(), mtime);
            }
            let changed = match (since.get(path), mtime) {
                (None, Some(_)) => true,
                (Some(prev), Some(now)) => now > *prev,
                _ => false,
            };
            if changed {
                if let Some(row) = Self::read_row(path)? {
                    events.push(match last_known.get(path) {
                        Some(old) => ChangeEvent::Update { old: old.clone(), new: row },
                        None => ChangeEvent::Insert { new: row },
                    });
                }
            }
        }
        for (path, _) in since.iter().filter(|(p, _)| !current_paths.contains(p)) {
            if let Some(old) = last_known.get(path) {
                events.push(ChangeEvent::Delete { old: old.clone() });
            }
        }
        Ok((events, snapshot))
    }
}

#[async_trait]
impl TabularRepository for FilesystemBackend {
    fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    async fn put(&self, row: Row) -> Result<()> {
        validate(&self.schema, &row)?;
        let key = key_tuple(&self.primary_key, &row)?;
        let path = self.path_for(&key);
        let previous = Self::read_row(&path)?;
        fs::write(&path, serde_json::to_string_pretty(&row)?)?;
        self.notify(match previous {
            Some(old) => ChangeEvent::Update { old, new: row },
            None => ChangeEvent::Insert { new: row },
        });
        Ok(())
    }

    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()> {
        for row in rows {
            self.put(row).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &[Value]) -> Result<Option<Row>> {
        Self::read_row(&self.path_for(key))
    }

    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for path in self.all_paths()? {
            if let Some(row) = Self::read_row(&path)? {
                if row.get(field).map(|v| op.matches(v, value)).unwrap_or(false) {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    async fn delete_by_key(&self, key: &[Value]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(old) = Self::read_row(&path)? {
            fs::remove_file(&path)?;
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(())
    }

    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize> {
        let matching = self.search(field, value, op).await?;
        let mut removed = 0;
        for row in matching {
            let key = key_tuple(&self.primary_key, &row)?;
            self.delete_by_key(&key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.all_paths()? {
            if let Some(old) = Self::read_row(&path)? {
                fs::remove_file(&path)?;
                self.notify(ChangeEvent::Delete { old });
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for path in self.all_paths()? {
            if let Some(row) = Self::read_row(&path)? {
                out.push(row);
                if limit.map(|n| out.len() >= n).unwrap_or(false) {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.all_paths()?.len())
    }

    async fn subscribe_to_changes(&self, options: SubscribeOptions) -> Result<ChangeSubscription> {
        let interval_ms = options.polling_interval_ms.unwrap_or(DEFAULT_POLL_MS);
        let _ = interval_ms; // accepted for parity with the storage contract; see `poll_for_changes`.
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriber_options.lock().push(options);
        self.subscribers.lock().push(sender);
        Ok(ChangeSubscription { receiver })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{FieldDescriptor, FieldType};
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("id", FieldType::String),
            FieldDescriptor::required("n", FieldType::Integer),
        ])
    }

    fn row(id: &str, n: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(id.into()));
        row.insert("n".into(), Value::Integer(n));
        row
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path(), schema(), vec!["id".into()]).unwrap();
        backend.put(row("a", 1)).await.unwrap();
        let fetched = backend.get(&[Value::String("a".into())]).await.unwrap();
        assert_eq!(fetched, Some(row("a", 1)));
    }

    #[tokio::test]
    async fn delete_all_removes_files() {
        let dir = tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path(), schema(), vec!["id".into()]).unwrap();
        backend.put_bulk(vec![row("a", 1), row("b", 2)]).await.unwrap();
        assert_eq!(backend.size().await.unwrap(), 2);
        let removed = backend.delete_all().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscription_observes_put() {
        let dir = tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path(), schema(), vec!["id".into()]).unwrap();
        let mut sub = backend.subscribe_to_changes(SubscribeOptions::all()).await.unwrap();
        backend.put(row("a", 1)).await.unwrap();
        let event = sub.receiver.recv().await.unwrap();
        assert!(matches!(event, ChangeEvent::Insert { .. }));
    }
}
