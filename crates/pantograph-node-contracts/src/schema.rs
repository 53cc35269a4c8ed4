//! Structural schema descriptors for dataflow ports and stored rows.

use serde::{Deserialize, Serialize};

/// The semantic type of a single field.
///
/// Mirrors the set every dataflow port and every stored row is drawn from:
/// string, integer, number, boolean, binary blob, timestamp, array-of-T,
/// object-of-schema, enum-of-strings, or any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Binary,
    Timestamp,
    Array { of: Box<FieldType> },
    Object { schema: Box<Schema> },
    Enum { values: Vec<String> },
    Any,
}

impl FieldType {
    /// An array whose elements are the given scalar field type.
    pub fn array_of(of: FieldType) -> Self {
        FieldType::Array { of: Box::new(of) }
    }

    /// A nested object conforming to `schema`.
    pub fn object(schema: Schema) -> Self {
        FieldType::Object {
            schema: Box::new(schema),
        }
    }

    /// An enum of the given allowed string values.
    pub fn enum_of<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        FieldType::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this type, as declared on a port, is a scalar (non-array)
    /// type — used by the graph runner to decide whether an array-shaped
    /// input value should trigger array fan-out on that port.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Array { .. })
    }
}

/// A single named field in a [`Schema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl FieldDescriptor {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }
}

/// A structural type description: a set of named fields, each with a
/// semantic type, plus a flag for whether unlisted fields are tolerated
/// (open records).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub additional_fields: bool,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            additional_fields: false,
        }
    }

    /// Allow fields not named in `fields` to pass validation untouched.
    pub fn with_additional_fields(mut self) -> Self {
        self.additional_fields = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_vs_array() {
        assert!(FieldType::String.is_scalar());
        assert!(!FieldType::array_of(FieldType::String).is_scalar());
    }

    #[test]
    fn schema_field_lookup() {
        let schema = Schema::new(vec![FieldDescriptor::required("n", FieldType::Integer)]);
        assert!(schema.field("n").is_some());
        assert!(schema.field("missing").is_none());
    }
}
