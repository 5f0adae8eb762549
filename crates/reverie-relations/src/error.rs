use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelationsError {
    #[error("storage error: {0}")]
    Storage(#[from] reverie_storage::StorageError),

    #[error("embedding error: {0}")]
    Embedding(#[from] reverie_embed::EmbeddingError),

    #[error("memory store error: {0}")]
    MemoryStore(#[from] reverie_memory::MemoryStoreError),
}

pub type Result<T> = std::result::Result<T, RelationsError>;

impl From<RelationsError> for reverie_core::ReverieError {
    fn from(e: RelationsError) -> Self {
        match e {
            RelationsError::Storage(inner) => inner.into(),
            RelationsError::Embedding(inner) => reverie_core::ReverieError::Embedding(inner.to_string()),
            RelationsError::MemoryStore(inner) => inner.into(),
        }
    }
}
