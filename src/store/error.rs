use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document is not an object: {0}")]
    NotAnObject(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, StoreError>;
