//! Multi-tenancy via prefix columns: wraps any [`TabularRepository`] so every
//! operation implicitly filters by, and stamps rows with, a bound set of
//! column values. Two `PrefixedRepository`s over the same backend with
//! different bindings see disjoint rows.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pantograph_node_contracts::{Row, Value};

use crate::change::{ChangeSubscription, SubscribeOptions};
use crate::error::Result;
use crate::op::Op;
use crate::repository::TabularRepository;

/// Wraps `inner`, stamping every written row with `binding` and scoping every
/// read/delete/subscription to rows matching it.
///
/// `deleteAll()` only removes rows within the current binding; a widened view
/// across all tenants is not exposed here (use the unwrapped backend).
/// Subscriptions default to the bound prefix but may widen or change it by
/// passing an explicit `prefix_filter` in [`SubscribeOptions`].
pub struct PrefixedRepository<R: TabularRepository> {
    inner: R,
    binding: Row,
}

impl<R: TabularRepository> PrefixedRepository<R> {
    pub fn new(inner: R, binding: Row) -> Self {
        Self { inner, binding }
    }

    fn stamp(&self, mut row: Row) -> Row {
        for (k, v) in &self.binding {
            row.insert(k.clone(), v.clone());
        }
        row
    }

    fn row_in_binding(&self, row: &Row) -> bool {
        self.binding.iter().all(|(k, v)| row.get(k) == Some(v))
    }

    fn full_key(&self, key: &[Value]) -> Vec<Value> {
        // The primary key as declared on `inner` already includes the prefix
        // columns (they are ordinary schema fields); fill in the bound
        // values for any prefix-key positions the caller omitted.
        key_with_binding_gaps(self.inner.primary_key(), key, &self.binding)
    }
}

fn key_with_binding_gaps(primary_key: &[String], supplied: &[Value], binding: &Row) -> Vec<Value> {
    if supplied.len() == primary_key.len() {
        return supplied.to_vec();
    }
    // The caller supplied only the non-prefix portion of the key; fill the
    // leading prefix-column positions from the binding, in declared order.
    let mut out = Vec::with_capacity(primary_key.len());
    let mut supplied = supplied.iter();
    for field in primary_key {
        if let Some(bound) = binding.get(field) {
            out.push(bound.clone());
        } else if let Some(v) = supplied.next() {
            out.push(v.clone());
        }
    }
    out
}

#[async_trait]
impl<R: TabularRepository> TabularRepository for PrefixedRepository<R> {
    fn primary_key(&self) -> &[String] {
        self.inner.primary_key()
    }

    async fn put(&self, row: Row) -> Result<()> {
        self.inner.put(self.stamp(row)).await
    }

    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()> {
        let rows = rows.into_iter().map(|r| self.stamp(r)).collect();
        self.inner.put_bulk(rows).await
    }

    async fn get(&self, key: &[Value]) -> Result<Option<Row>> {
        let full_key = self.full_key(key);
        let row = self.inner.get(&full_key).await?;
        Ok(row.filter(|r| self.row_in_binding(r)))
    }

    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        let rows = self.inner.search(field, value, op).await?;
        Ok(rows.into_iter().filter(|r| self.row_in_binding(r)).collect())
    }

    async fn delete_by_key(&self, key: &[Value]) -> Result<()> {
        let full_key = self.full_key(key);
        if let Some(row) = self.inner.get(&full_key).await? {
            if self.row_in_binding(&row) {
                self.inner.delete_by_key(&full_key).await?;
            }
        }
        Ok(())
    }

    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize> {
        let matching = self.inner.search(field, value, op).await?;
        let mut removed = 0;
        for row in matching {
            if !self.row_in_binding(&row) {
                continue;
            }
            let key = self.inner.primary_key().iter().map(|k| row[k].clone()).collect::<Vec<_>>();
            self.inner.delete_by_key(&key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let all = self.inner.get_all(None).await?;
        let mut removed = 0;
        for row in all {
            if !self.row_in_binding(&row) {
                continue;
            }
            let key = self.inner.primary_key().iter().map(|k| row[k].clone()).collect::<Vec<_>>();
            self.inner.delete_by_key(&key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>> {
        let all = self.inner.get_all(None).await?;
        let mut scoped: Vec<Row> = all.into_iter().filter(|r| self.row_in_binding(r)).collect();
        if let Some(limit) = limit {
            scoped.truncate(limit);
        }
        Ok(scoped)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.get_all(None).await?.len())
    }

    async fn subscribe_to_changes(&self, mut options: SubscribeOptions) -> Result<ChangeSubscription> {
        if options.prefix_filter.is_empty() {
            options.prefix_filter = self.binding.clone();
        }
        self.inner.subscribe_to_changes(options).await
    }
}
