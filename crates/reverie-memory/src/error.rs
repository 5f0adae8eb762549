use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] reverie_storage::StorageError),

    #[error("embedding error: {0}")]
    Embedding(#[from] reverie_embed::EmbeddingError),

    #[error("memory not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, MemoryStoreError>;

impl From<MemoryStoreError> for reverie_core::ReverieError {
    fn from(e: MemoryStoreError) -> Self {
        match e {
            MemoryStoreError::Storage(inner) => inner.into(),
            MemoryStoreError::Embedding(inner) => reverie_core::ReverieError::Embedding(inner.to_string()),
            MemoryStoreError::NotFound { id } => reverie_core::ReverieError::MemoryNotFound { id },
        }
    }
}
