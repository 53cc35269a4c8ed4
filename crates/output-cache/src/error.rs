use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] tabular_store::Error),

    #[error("failed to serialize cached value: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to compress cached value: {0}")]
    Compress(std::io::Error),

    #[error("failed to decompress cached value: {0}")]
    Decompress(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
