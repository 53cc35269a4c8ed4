//! Canonical schema, value, and fingerprint contracts shared by the task
//! graph and the output cache.
//!
//! This crate carries no storage or execution logic of its own — it is the
//! structural vocabulary ([`Schema`], [`Value`], [`Row`]) that every other
//! crate in the workspace validates against, plus the content-fingerprint
//! used as a cache key everywhere a task's or job's input needs one.

mod fingerprint;
mod schema;
mod value;

pub use fingerprint::{fingerprint, fingerprint_json};
pub use schema::{FieldDescriptor, FieldType, Schema};
pub use value::{row_from_json, row_to_json, validate, Row, Value, ValidationError};
