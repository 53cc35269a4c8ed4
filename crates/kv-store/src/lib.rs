//! A key-value repository presented over a [`tabular_store::TabularRepository`]
//! whose schema is `{key, value}` with primary key `[key]`. Non-primitive
//! values are serialized as JSON on store and deserialized on load; scalar
//! `serde_json` values are carried as the matching [`pantograph_node_contracts::Value`]
//! variant directly so a plain string or number doesn't round-trip through a
//! quoted JSON string.

use pantograph_node_contracts::{fingerprint_json, FieldDescriptor, FieldType, Row, Schema, Value};
use serde::Serialize;
use tabular_store::TabularRepository;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] tabular_store::Error),
    #[error("stored value for key `{0}` is not valid JSON: {1}")]
    Deserialize(String, serde_json::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The `{key, value}` schema every [`KvRepository`] backend is created with.
pub fn schema() -> Schema {
    Schema::new(vec![
        FieldDescriptor::required("key", FieldType::String),
        FieldDescriptor::required("value", FieldType::String),
    ])
}

fn to_stored(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn from_stored(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// A key-value facade over any `TabularRepository` created with [`schema`]
/// and primary key `["key"]`.
pub struct KvRepository<R: TabularRepository> {
    inner: R,
}

impl<R: TabularRepository> KvRepository<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub async fn put(&self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let mut row = Row::new();
        row.insert("key".into(), Value::String(key.into()));
        row.insert("value".into(), Value::String(to_stored(&value)));
        self.inner.put(row).await?;
        Ok(())
    }

    pub async fn put_bulk(&self, entries: Vec<(String, serde_json::Value)>) -> Result<()> {
        let rows = entries
            .into_iter()
            .map(|(key, value)| {
                let mut row = Row::new();
                row.insert("key".into(), Value::String(key));
                row.insert("value".into(), Value::String(to_stored(&value)));
                row
            })
            .collect();
        self.inner.put_bulk(rows).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = self.inner.get(&[Value::String(key.to_string())]).await?;
        Ok(row.and_then(|r| r.get("value").and_then(Value::as_str).map(from_stored)))
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete_by_key(&[Value::String(key.to_string())]).await?;
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<(String, serde_json::Value)>> {
        let rows = self.inner.get_all(None).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let key = r.get("key").and_then(Value::as_str)?.to_string();
                let value = r.get("value").and_then(Value::as_str).map(from_stored)?;
                Some((key, value))
            })
            .collect())
    }

    pub async fn delete_all(&self) -> Result<usize> {
        Ok(self.inner.delete_all().await?)
    }

    pub async fn size(&self) -> Result<usize> {
        Ok(self.inner.size().await?)
    }
}

/// A stable content fingerprint for an arbitrary serializable object,
/// suitable as a cache key; the canonical key-derivation used by the output
/// cache.
pub fn get_object_as_id_string<T: Serialize>(obj: &T) -> Result<String> {
    let json = serde_json::to_value(obj)?;
    Ok(fingerprint_json(&json))
}
