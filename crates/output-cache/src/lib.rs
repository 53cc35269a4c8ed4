//! A fingerprint-keyed cache of task outputs (§4.8): a thin layer over a
//! `tabular-store` repository, storing each output as a `zstd`-compressed
//! JSON blob keyed by `fingerprint(input)` and the producing task's type.

mod error;
mod singleflight;

use async_trait::async_trait;
use chrono::Utc;
use pantograph_node_contracts::{fingerprint_json, FieldDescriptor, FieldType, Row, Schema, Value};
use tabular_store::{Op, TabularRepository};

pub use error::{Error, Result};
pub use singleflight::Singleflighted;

/// Read/write access to cached task outputs, independent of the backend
/// behind it.
#[async_trait]
pub trait OutputCache: Send + Sync {
    /// Computes `key = fingerprint(input)`, serializes and compresses
    /// `output`, and stores it with the current timestamp.
    async fn save_output(&self, task_type: &str, input: &serde_json::Value, output: &serde_json::Value) -> Result<()>;

    /// Looks up and decompresses the cached output for `(task_type,
    /// fingerprint(input))`, if any.
    async fn get_output(&self, task_type: &str, input: &serde_json::Value) -> Result<Option<serde_json::Value>>;

    /// Deletes every entry older than `threshold_ms_ago` milliseconds.
    /// Returns the count removed.
    async fn clear_older_than(&self, threshold_ms_ago: i64) -> Result<usize>;
}

/// The cache's storage schema, primary key `[key, taskType]` (§4.8).
pub fn schema() -> Schema {
    Schema::new(vec![
        FieldDescriptor::required("key", FieldType::String),
        FieldDescriptor::required("taskType", FieldType::String),
        FieldDescriptor::required("value", FieldType::Binary),
        FieldDescriptor::required("createdAt", FieldType::Timestamp),
    ])
}

pub fn primary_key() -> Vec<String> {
    vec!["key".to_string(), "taskType".to_string()]
}

/// The default [`OutputCache`] implementation: `zstd`-compressed JSON rows
/// in a `TabularRepository` built with [`schema`]/[`primary_key`].
pub struct TabularOutputCache<R: TabularRepository> {
    repository: R,
    compression_level: i32,
}

impl<R: TabularRepository> TabularOutputCache<R> {
    /// `compression_level` follows `zstd`'s own scale (1 fastest, 22 most
    /// compact); `3` is `zstd`'s own default and this crate's default too.
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            compression_level: 3,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    fn row(&self, key: &str, task_type: &str, compressed: Vec<u8>) -> Row {
        let mut row = Row::new();
        row.insert("key".into(), Value::String(key.to_string()));
        row.insert("taskType".into(), Value::String(task_type.to_string()));
        row.insert("value".into(), Value::Binary(compressed));
        row.insert("createdAt".into(), Value::Timestamp(Utc::now()));
        row
    }
}

#[async_trait]
impl<R: TabularRepository> OutputCache for TabularOutputCache<R> {
    async fn save_output(&self, task_type: &str, input: &serde_json::Value, output: &serde_json::Value) -> Result<()> {
        let key = fingerprint_json(input);
        let bytes = serde_json::to_vec(output)?;
        let compressed = zstd::stream::encode_all(bytes.as_slice(), self.compression_level).map_err(Error::Compress)?;
        self.repository.put(self.row(&key, task_type, compressed)).await?;
        Ok(())
    }

    async fn get_output(&self, task_type: &str, input: &serde_json::Value) -> Result<Option<serde_json::Value>> {
        let key = fingerprint_json(input);
        let row = self
            .repository
            .get(&[Value::String(key), Value::String(task_type.to_string())])
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(Value::Binary(compressed)) = row.get("value") else {
            return Ok(None);
        };
        let decompressed = zstd::stream::decode_all(compressed.as_slice()).map_err(Error::Decompress)?;
        Ok(Some(serde_json::from_slice(&decompressed)?))
    }

    async fn clear_older_than(&self, threshold_ms_ago: i64) -> Result<usize> {
        let threshold = Utc::now() - chrono::Duration::milliseconds(threshold_ms_ago);
        Ok(self.repository.delete_search("createdAt", &Value::Timestamp(threshold), Op::Lt).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabular_store::backends::MemoryBackend;

    fn cache() -> TabularOutputCache<MemoryBackend> {
        TabularOutputCache::new(MemoryBackend::new(schema(), primary_key()))
    }

    #[tokio::test]
    async fn saves_and_retrieves_by_fingerprint() {
        let cache = cache();
        let input = serde_json::json!({"a": 1, "b": 2});
        let output = serde_json::json!({"result": "hello"});
        cache.save_output("echo", &input, &output).await.unwrap();

        // Same content, different key order: must hit the same entry.
        let reordered_input = serde_json::json!({"b": 2, "a": 1});
        let hit = cache.get_output("echo", &reordered_input).await.unwrap();
        assert_eq!(hit, Some(output));
    }

    #[tokio::test]
    async fn distinguishes_by_task_type() {
        let cache = cache();
        let input = serde_json::json!({"a": 1});
        cache.save_output("echo", &input, &serde_json::json!("echo-out")).await.unwrap();
        assert!(cache.get_output("other", &input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = cache();
        let input = serde_json::json!({"never": "saved"});
        assert!(cache.get_output("echo", &input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_older_than_removes_stale_entries_but_keeps_fresh_ones() {
        let cache = cache();

        // Back-date this entry's `createdAt` well past the pruning threshold.
        let stale_input = serde_json::json!("stale");
        let stale_bytes = serde_json::to_vec(&serde_json::json!("a")).unwrap();
        let stale_compressed = zstd::stream::encode_all(stale_bytes.as_slice(), cache.compression_level).unwrap();
        let mut stale_row = cache.row(&fingerprint_json(&stale_input), "echo", stale_compressed);
        stale_row.insert("createdAt".into(), Value::Timestamp(Utc::now() - chrono::Duration::hours(2)));
        cache.repository.put(stale_row).await.unwrap();

        cache.save_output("echo", &serde_json::json!("fresh"), &serde_json::json!("b")).await.unwrap();

        // Threshold: anything older than one hour ago is pruned.
        let removed = cache.clear_older_than(60 * 60 * 1000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get_output("echo", &stale_input).await.unwrap().is_none());
        assert!(cache.get_output("echo", &serde_json::json!("fresh")).await.unwrap().is_some());
    }
}
