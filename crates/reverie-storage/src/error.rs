use thiserror::Error;

/// Errors that can occur within the storage subsystem.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("memory not found: {id}")]
    MemoryNotFound { id: String },

    #[error("scheduled item not found: {id}")]
    ScheduledItemNotFound { id: String },

    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("invalid row data: {0}")]
    InvalidRow(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for reverie_core::ReverieError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Database(e) => reverie_core::ReverieError::Database(e),
            StorageError::Serialization(e) => reverie_core::ReverieError::Serialization(e),
            StorageError::MemoryNotFound { id } => reverie_core::ReverieError::MemoryNotFound { id },
            StorageError::ScheduledItemNotFound { id } => {
                reverie_core::ReverieError::ScheduledItemNotFound { id }
            }
            StorageError::SessionNotFound { id } => reverie_core::ReverieError::SessionNotFound { id },
            StorageError::InvalidRow(msg) => reverie_core::ReverieError::Internal(msg),
        }
    }
}
