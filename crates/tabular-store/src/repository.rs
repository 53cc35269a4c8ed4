use async_trait::async_trait;
use pantograph_node_contracts::{Row, Value};

use crate::change::{ChangeSubscription, SubscribeOptions};
use crate::error::{Error, Result};
use crate::op::Op;

/// Extracts the primary-key tuple (one [`Value`] per key field, in
/// declared order) from `row`, failing if any key field is absent.
pub fn key_tuple(primary_key: &[String], row: &Row) -> Result<Vec<Value>> {
    if primary_key.is_empty() {
        return Err(Error::EmptyPrimaryKey);
    }
    primary_key
        .iter()
        .map(|field| {
            row.get(field)
                .cloned()
                .ok_or_else(|| Error::MissingPrimaryKeyField(field.clone()))
        })
        .collect()
}

/// A typed row store, parameterized by a schema and an ordered primary-key
/// field-name list, addressable by primary-key tuple, equality/range search,
/// and bulk operations.
///
/// Implementations must guarantee that `put` is an upsert (insert-or-replace
/// keyed by primary key) and that `put`/status-style transitions used by
/// higher layers (the job queue's PENDING→PROCESSING CAS) are exclusive: at
/// most one caller observes a successful transition out of a given prior
/// state.
#[async_trait]
pub trait TabularRepository: Send + Sync {
    /// The ordered list of field names making up this repository's primary
    /// key.
    fn primary_key(&self) -> &[String];

    /// Upserts `row` by primary key. Fails with [`Error::Validation`] if the
    /// row does not satisfy the repository's schema.
    async fn put(&self, row: Row) -> Result<()>;

    /// Upserts every row in `rows`. Within a backend that supports
    /// transactions this is atomic: either every row is written or none is.
    /// Backends without transaction support apply rows best-effort in order
    /// and return the first error encountered, leaving prior rows written.
    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()>;

    /// Returns the row whose primary-key tuple equals `key`, or `None`.
    async fn get(&self, key: &[Value]) -> Result<Option<Row>>;

    /// Returns every row matching `field OP value`. Backends that cannot
    /// evaluate `op` on `field` (e.g. a range op on an unindexed field) fail
    /// with [`Error::UnsupportedOperation`].
    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>>;

    /// Deletes the row with the given primary-key tuple, if present.
    async fn delete_by_key(&self, key: &[Value]) -> Result<()>;

    /// Deletes every row matching `field OP value`; returns the count
    /// removed.
    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize>;

    /// Deletes every row in this repository (within the active prefix
    /// binding, if one exists). Returns the count removed.
    async fn delete_all(&self) -> Result<usize>;

    /// Returns every row, optionally capped at `limit`.
    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>>;

    /// Returns the number of rows currently stored.
    async fn size(&self) -> Result<usize>;

    /// Subscribes to INSERT/UPDATE/DELETE notifications. See
    /// [`SubscribeOptions`] for filtering and polling-interval control.
    async fn subscribe_to_changes(&self, options: SubscribeOptions) -> Result<ChangeSubscription>;
}

/// Lets a shared backend (e.g. one handed to several [`crate::prefix::PrefixedRepository`]
/// tenants) be used anywhere a `TabularRepository` is expected.
#[async_trait]
impl<T: TabularRepository + ?Sized> TabularRepository for std::sync::Arc<T> {
    fn primary_key(&self) -> &[String] {
        (**self).primary_key()
    }

    async fn put(&self, row: Row) -> Result<()> {
        (**self).put(row).await
    }

    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()> {
        (**self).put_bulk(rows).await
    }

    async fn get(&self, key: &[Value]) -> Result<Option<Row>> {
        (**self).get(key).await
    }

    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        (**self).search(field, value, op).await
    }

    async fn delete_by_key(&self, key: &[Value]) -> Result<()> {
        (**self).delete_by_key(key).await
    }

    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize> {
        (**self).delete_search(field, value, op).await
    }

    async fn delete_all(&self) -> Result<usize> {
        (**self).delete_all().await
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>> {
        (**self).get_all(limit).await
    }

    async fn size(&self) -> Result<usize> {
        (**self).size().await
    }

    async fn subscribe_to_changes(&self, options: SubscribeOptions) -> Result<ChangeSubscription> {
        (**self).subscribe_to_changes(options).await
    }
}
