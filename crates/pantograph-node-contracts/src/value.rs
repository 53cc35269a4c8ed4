//! A tagged-union port/row value, plus schema validation against it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{FieldType, Schema};

/// A runtime value carried on a dataflow port or stored in a row.
///
/// Kept as an explicit tagged union (rather than raw `serde_json::Value`)
/// so the schema that accompanies a value can be checked structurally
/// instead of failing deep inside an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Converts to a `serde_json::Value` for wire transport and JSON
    /// persistence. Binary blobs and timestamps are wrapped in a
    /// single-key tagged object (`__binary__`/`__timestamp__`) so
    /// [`Value::from_json`] can recover them unambiguously from a plain
    /// string or array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!(*i),
            Value::Number(n) => serde_json::json!(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(bytes) => {
                serde_json::json!({ "__binary__": bytes.iter().map(|b| *b as u64).collect::<Vec<_>>() })
            }
            Value::Timestamp(ts) => serde_json::json!({ "__timestamp__": ts.to_rfc3339() }),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => {
                serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }

    /// The inverse of [`Value::to_json`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::String(s)) = map.get("__timestamp__") {
                        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                            return Value::Timestamp(dt.with_timezone(&Utc));
                        }
                    }
                    if let Some(serde_json::Value::Array(bytes)) = map.get("__binary__") {
                        return Value::Binary(bytes.iter().filter_map(|v| v.as_u64()).map(|n| n as u8).collect());
                    }
                }
                Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

/// A mapping from field name to typed value conforming to a [`Schema`].
///
/// The sole unit stored by the tabular layer and the sole unit carried on a
/// task's `runInputData`/`runOutputData`.
pub type Row = BTreeMap<String, Value>;

/// Converts a [`Row`] to a `serde_json::Map`, field by field, via
/// [`Value::to_json`].
pub fn row_to_json(row: &Row) -> serde_json::Map<String, serde_json::Value> {
    row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

/// Converts a `serde_json::Map` to a [`Row`], field by field, via
/// [`Value::from_json`].
pub fn row_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Row {
    map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()
}

/// Raised when a row does not satisfy the schema it is checked against.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` has the wrong type: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("field `{0}` is not declared on this schema and additional_fields is false")]
    UnexpectedField(String),
    #[error("value `{0}` is not one of the declared enum variants")]
    InvalidEnumValue(String),
}

/// Validates `row` against `schema`, field by field.
///
/// Array fan-out is resolved by the graph runner *before* this check runs on
/// a task's final `runInputData`, so a scalar-typed field holding an array
/// here is treated as a genuine type mismatch, not a fan-out candidate.
pub fn validate(schema: &Schema, row: &Row) -> Result<(), ValidationError> {
    for field in &schema.fields {
        match row.get(&field.name) {
            Some(value) => check_type(&field.field_type, value, &field.name)?,
            None if field.required => return Err(ValidationError::MissingField(field.name.clone())),
            None => {}
        }
    }
    if !schema.additional_fields {
        for key in row.keys() {
            if schema.field(key).is_none() {
                return Err(ValidationError::UnexpectedField(key.clone()));
            }
        }
    }
    Ok(())
}

fn check_type(expected: &FieldType, value: &Value, field_name: &str) -> Result<(), ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        field: field_name.to_string(),
        expected: format!("{expected:?}"),
        actual: format!("{value:?}"),
    };

    match (expected, value) {
        (FieldType::Any, _) => Ok(()),
        (FieldType::String, Value::String(_)) => Ok(()),
        (FieldType::Integer, Value::Integer(_)) => Ok(()),
        (FieldType::Number, Value::Number(_) | Value::Integer(_)) => Ok(()),
        (FieldType::Boolean, Value::Boolean(_)) => Ok(()),
        (FieldType::Binary, Value::Binary(_)) => Ok(()),
        (FieldType::Timestamp, Value::Timestamp(_)) => Ok(()),
        (FieldType::Array { of }, Value::Array(items)) => {
            for item in items {
                check_type(of, item, field_name)?;
            }
            Ok(())
        }
        (FieldType::Object { schema }, Value::Object(fields)) => {
            let row: Row = fields.clone();
            validate(schema, &row).map_err(|_| mismatch())
        }
        (FieldType::Enum { values }, Value::String(s)) => {
            if values.contains(s) {
                Ok(())
            } else {
                Err(ValidationError::InvalidEnumValue(s.clone()))
            }
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("name", FieldType::String),
            FieldDescriptor::optional("age", FieldType::Integer),
        ])
    }

    #[test]
    fn accepts_valid_row() {
        let mut row = Row::new();
        row.insert("name".into(), Value::String("ada".into()));
        assert!(validate(&sample_schema(), &row).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let row = Row::new();
        assert!(matches!(
            validate(&sample_schema(), &row),
            Err(ValidationError::MissingField(f)) if f == "name"
        ));
    }

    #[test]
    fn rejects_unexpected_field_when_closed() {
        let mut row = Row::new();
        row.insert("name".into(), Value::String("ada".into()));
        row.insert("extra".into(), Value::Boolean(true));
        assert!(matches!(
            validate(&sample_schema(), &row),
            Err(ValidationError::UnexpectedField(f)) if f == "extra"
        ));
    }

    #[test]
    fn open_schema_allows_additional_fields() {
        let schema = sample_schema().with_additional_fields();
        let mut row = Row::new();
        row.insert("name".into(), Value::String("ada".into()));
        row.insert("extra".into(), Value::Boolean(true));
        assert!(validate(&schema, &row).is_ok());
    }

    #[test]
    fn json_roundtrip_preserves_binary_and_timestamp() {
        let ts = Utc::now();
        let values = vec![
            Value::Null,
            Value::Boolean(true),
            Value::Integer(7),
            Value::Number(1.5),
            Value::String("hi".into()),
            Value::Binary(vec![1, 2, 3]),
            Value::Timestamp(ts),
            Value::Array(vec![Value::Integer(1), Value::String("x".into())]),
        ];
        for value in values {
            let json = value.to_json();
            assert_eq!(Value::from_json(&json), value);
        }
    }

    #[test]
    fn row_json_roundtrip() {
        let mut row = Row::new();
        row.insert("name".into(), Value::String("ada".into()));
        row.insert("tags".into(), Value::Array(vec![Value::String("a".into())]));
        let json = row_to_json(&row);
        assert_eq!(row_from_json(&json), row);
    }

    #[test]
    fn array_field_of_scalars() {
        let schema = Schema::new(vec![FieldDescriptor::required(
            "values",
            FieldType::array_of(FieldType::String),
        )]);
        let mut row = Row::new();
        row.insert(
            "values".into(),
            Value::Array(vec![Value::String("x".into()), Value::String("y".into())]),
        );
        assert!(validate(&schema, &row).is_ok());
    }
}
