//! Embedded SQL backend using `rusqlite` (bundled). One table per
//! repository; primary key columns are declared `PRIMARY KEY`; `search`
//! compiles to parameterized `WHERE` clauses; change notification is by
//! polling (`polling_interval_ms`).

use std::path::Path;

use async_trait::async_trait;
use pantograph_node_contracts::{validate, FieldType, Row, Schema, Value};
use parking_lot::Mutex;
use rusqlite::types::{Null, ToSqlOutput, Value as SqlValue};
use rusqlite::{params_from_iter, Connection, ToSql};
use tokio::sync::mpsc;

use crate::change::{ChangeEvent, ChangeSubscription, SubscribeOptions};
use crate::error::{Error, Result};
use crate::op::Op;
use crate::repository::{key_tuple, TabularRepository};

fn column_sql_type(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::String | FieldType::Enum { .. } | FieldType::Timestamp => "TEXT",
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Number => "REAL",
        FieldType::Binary => "BLOB",
        FieldType::Array { .. } | FieldType::Object { .. } | FieldType::Any => "TEXT",
    }
}

fn supports_range_ops(field_type: &FieldType) -> bool {
    !matches!(field_type, FieldType::Array { .. } | FieldType::Object { .. } | FieldType::Any)
}

fn value_to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(*b as i64),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Number(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Binary(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(t) => SqlValue::Text(t.to_rfc3339()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

fn sql_to_value(field_type: &FieldType, raw: SqlValue) -> Result<Value> {
    Ok(match (field_type, raw) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Boolean, SqlValue::Integer(i)) => Value::Boolean(i != 0),
        (FieldType::Integer, SqlValue::Integer(i)) => Value::Integer(i),
        (FieldType::Number, SqlValue::Real(r)) => Value::Number(r),
        (FieldType::Number, SqlValue::Integer(i)) => Value::Number(i as f64),
        (FieldType::Timestamp, SqlValue::Text(s)) => Value::Timestamp(
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        ),
        (FieldType::Array { .. } | FieldType::Object { .. } | FieldType::Any, SqlValue::Text(s)) => {
            serde_json::from_str(&s)?
        }
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Blob(b)) => Value::Binary(b),
        (_, SqlValue::Real(r)) => Value::Number(r),
        (_, SqlValue::Integer(i)) => Value::Integer(i),
    })
}

struct SqlWrapper(SqlValue);
impl ToSql for SqlWrapper {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(self.0.clone()))
    }
}

struct Subscriber {
    options: SubscribeOptions,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct SqliteBackend {
    schema: Schema,
    primary_key: Vec<String>,
    table: String,
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>, table: impl Into<String>, schema: Schema, primary_key: Vec<String>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, table, schema, primary_key)
    }

    pub fn open_in_memory(table: impl Into<String>, schema: Schema, primary_key: Vec<String>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, table, schema, primary_key)
    }

    fn from_connection(conn: Connection, table: impl Into<String>, schema: Schema, primary_key: Vec<String>) -> Result<Self> {
        let table = table.into();
        let mut columns: Vec<String> = schema
            .fields
            .iter()
            .map(|f| format!("\"{}\" {}", f.name, column_sql_type(&f.field_type)))
            .collect();
        if !primary_key.is_empty() {
            let pk_cols: Vec<String> = primary_key.iter().map(|k| format!("\"{k}\"")).collect();
            columns.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" ({})",
            columns.join(", ")
        ))?;
        Ok(Self {
            schema,
            primary_key,
            table,
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn notify(&self, event: ChangeEvent) {
        let row_for_filter = match &event {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => new,
            ChangeEvent::Delete { old } => old,
        };
        let mut subs = self.subscribers.lock();
        subs.retain(|sub| {
            if !sub.options.row_matches(row_for_filter) {
                return true;
            }
            sub.sender.send(event.clone()).is_ok()
        });
    }

    fn row_from_sqlite(&self, stmt_row: &rusqlite::Row<'_>) -> Result<Row> {
        let mut row = Row::new();
        for (idx, field) in self.schema.fields.iter().enumerate() {
            let raw: SqlValue = stmt_row.get(idx)?;
            row.insert(field.name.clone(), sql_to_value(&field.field_type, raw)?);
        }
        Ok(row)
    }

    fn select_columns(&self) -> String {
        self.schema
            .fields
            .iter()
            .map(|f| format!("\"{}\"", f.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.schema.field(field).map(|f| &f.field_type)
    }

    fn get_sync(&self, conn: &Connection, key: &[Value]) -> Result<Option<Row>> {
        let where_clause = self
            .primary_key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("\"{k}\" = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT {} FROM \"{}\" WHERE {}", self.select_columns(), self.table, where_clause);
        let values: Vec<SqlWrapper> = key.iter().map(|v| value_to_sql(v).map(SqlWrapper)).collect::<Result<_>>()?;
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        if let Some(r) = rows.next()? {
            Ok(Some(self.row_from_sqlite(r)?))
        } else {
            Ok(None)
        }
    }

    fn search_sync(&self, conn: &Connection, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" {} ?1",
            self.select_columns(),
            self.table,
            field,
            op.as_sql()
        );
        let sql_value = SqlWrapper(value_to_sql(value)?);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows_iter = stmt.query(rusqlite::params![sql_value])?;
        let mut out = Vec::new();
        while let Some(r) = rows_iter.next()? {
            out.push(self.row_from_sqlite(r)?);
        }
        Ok(out)
    }

    fn get_all_sync(&self, conn: &Connection, limit: Option<usize>) -> Result<Vec<Row>> {
        let sql = match limit {
            Some(n) => format!("SELECT {} FROM \"{}\" LIMIT {n}", self.select_columns(), self.table),
            None => format!("SELECT {} FROM \"{}\"", self.select_columns(), self.table),
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut rows_iter = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(r) = rows_iter.next()? {
            out.push(self.row_from_sqlite(r)?);
        }
        Ok(out)
    }

    /// Upserts `row` on the given connection/transaction handle and returns
    /// the resulting change event, fetching the prior row first so callers
    /// can distinguish INSERT from UPDATE.
    fn upsert_sync(&self, conn: &Connection, row: Row) -> Result<ChangeEvent> {
        let key = key_tuple(&self.primary_key, &row)?;
        let previous = self.get_sync(conn, &key)?;

        let columns: Vec<&str> = self.schema.fields.iter().map(|f| f.name.as_str()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let col_list = columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
        let update_list = columns
            .iter()
            .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict_cols = self.primary_key.iter().map(|k| format!("\"{k}\"")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({col_list}) VALUES ({}) ON CONFLICT({conflict_cols}) DO UPDATE SET {update_list}",
            self.table,
            placeholders.join(", "),
        );
        let values: Vec<SqlWrapper> = columns
            .iter()
            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
            .map(|v| value_to_sql(&v).map(SqlWrapper))
            .collect::<Result<_>>()?;
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        conn.execute(&sql, params_from_iter(params))?;

        Ok(match previous {
            Some(old) => ChangeEvent::Update { old, new: row },
            None => ChangeEvent::Insert { new: row },
        })
    }
}

#[async_trait]
impl TabularRepository for SqliteBackend {
    fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    async fn put(&self, row: Row) -> Result<()> {
        validate(&self.schema, &row)?;
        let conn = self.conn.lock();
        let event = self.upsert_sync(&conn, row)?;
        drop(conn);
        self.notify(event);
        Ok(())
    }

    async fn put_bulk(&self, rows: Vec<Row>) -> Result<()> {
        for row in &rows {
            validate(&self.schema, row)?;
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(self.upsert_sync(&tx, row)?);
        }
        tx.commit()?;
        drop(conn);
        for event in events {
            self.notify(event);
        }
        Ok(())
    }

    async fn get(&self, key: &[Value]) -> Result<Option<Row>> {
        let conn = self.conn.lock();
        self.get_sync(&conn, key)
    }

    async fn search(&self, field: &str, value: &Value, op: Op) -> Result<Vec<Row>> {
        let field_type = self
            .field_type(field)
            .ok_or_else(|| Error::UnsupportedOperation {
                backend: "sqlite",
                field: field.to_string(),
                op: "any",
            })?;
        if !matches!(op, Op::Eq | Op::Ne) && !supports_range_ops(field_type) {
            return Err(Error::UnsupportedOperation {
                backend: "sqlite",
                field: field.to_string(),
                op: op.as_sql(),
            });
        }
        let conn = self.conn.lock();
        self.search_sync(&conn, field, value, op)
    }

    async fn delete_by_key(&self, key: &[Value]) -> Result<()> {
        let conn = self.conn.lock();
        let Some(old) = self.get_sync(&conn, key)? else {
            return Ok(());
        };
        let where_clause = self
            .primary_key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("\"{k}\" = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("DELETE FROM \"{}\" WHERE {}", self.table, where_clause);
        let values: Vec<SqlWrapper> = key.iter().map(|v| value_to_sql(v).map(SqlWrapper)).collect::<Result<_>>()?;
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        conn.execute(&sql, params_from_iter(params))?;
        drop(conn);
        self.notify(ChangeEvent::Delete { old });
        Ok(())
    }

    async fn delete_search(&self, field: &str, value: &Value, op: Op) -> Result<usize> {
        let field_type = self
            .field_type(field)
            .ok_or_else(|| Error::UnsupportedOperation {
                backend: "sqlite",
                field: field.to_string(),
                op: "any",
            })?;
        if !matches!(op, Op::Eq | Op::Ne) && !supports_range_ops(field_type) {
            return Err(Error::UnsupportedOperation {
                backend: "sqlite",
                field: field.to_string(),
                op: op.as_sql(),
            });
        }
        let conn = self.conn.lock();
        let matching = self.search_sync(&conn, field, value, op)?;
        let sql = format!("DELETE FROM \"{}\" WHERE \"{}\" {} ?1", self.table, field, op.as_sql());
        let sql_value = SqlWrapper(value_to_sql(value)?);
        let changed = conn.execute(&sql, rusqlite::params![sql_value])?;
        drop(conn);
        for old in matching {
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(changed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = self.get_all_sync(&conn, None)?;
        let changed = conn.execute(&format!("DELETE FROM \"{}\"", self.table), [])?;
        drop(conn);
        for old in removed {
            self.notify(ChangeEvent::Delete { old });
        }
        Ok(changed)
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        self.get_all_sync(&conn, limit)
    }

    async fn size(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", self.table), [], |r| r.get(0))?;
        Ok(count as usize)
    }

    async fn subscribe_to_changes(&self, options: SubscribeOptions) -> Result<ChangeSubscription> {
        // Notifications fire synchronously on the write path below, the same
        // as `MemoryBackend`. `polling_interval_ms` is accepted (per the
        // storage contract every backend implements) but unused here: a
        // genuine cross-process poller needs a `'static` owned connection to
        // run on its own timer, which `&self` on this trait can't provide.
        // Hosts needing to observe writes from *other* processes against the
        // same database file should run their own poll loop against `get_all`.
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { options, sender });
        Ok(ChangeSubscription { receiver })
    }
}
