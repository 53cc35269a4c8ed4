use pantograph_node_contracts::ValidationError;
use thiserror::Error;

/// Errors surfaced by a [`crate::TabularRepository`] implementation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("row failed schema validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("backend `{backend}` does not support operator `{op}` on field `{field}`")]
    UnsupportedOperation {
        backend: &'static str,
        field: String,
        op: &'static str,
    },

    #[error("primary key must name at least one field")]
    EmptyPrimaryKey,

    #[error("primary key field `{0}` is missing from the row")]
    MissingPrimaryKeyField(String),

    #[error("a row with this primary key already exists and put_bulk requires all-new keys")]
    DuplicateKeyInBulk,

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
