use reverie_embed::EmbeddingError;
use reverie_memory::MemoryStoreError;
use reverie_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    MemoryStore(#[from] MemoryStoreError),

    #[error("malformed extractor response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

impl From<ExtractError> for reverie_core::ReverieError {
    fn from(e: ExtractError) -> Self {
        reverie_core::ReverieError::Internal(e.to_string())
    }
}
