use reverie_embed::EmbeddingError;
use reverie_memory::MemoryStoreError;
use reverie_relations::RelationsError;
use reverie_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum GardenerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    MemoryStore(#[from] MemoryStoreError),
    #[error(transparent)]
    Relations(#[from] RelationsError),
}

pub type Result<T> = std::result::Result<T, GardenerError>;

impl From<GardenerError> for reverie_core::ReverieError {
    fn from(e: GardenerError) -> Self {
        match e {
            GardenerError::Storage(inner) => inner.into(),
            GardenerError::Embedding(inner) => reverie_core::ReverieError::Embedding(inner.to_string()),
            GardenerError::MemoryStore(inner) => inner.into(),
            GardenerError::Relations(inner) => inner.into(),
        }
    }
}
