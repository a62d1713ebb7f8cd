use anima_common::AnimaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory backend error: {0}")]
    Backend(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Memory not found: {0}")]
    NotFound(String),
}

impl From<MemoryError> for AnimaError {
    fn from(e: MemoryError) -> Self {
        AnimaError::Memory(e.to_string())
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        MemoryError::Backend(e.to_string())
    }
}
