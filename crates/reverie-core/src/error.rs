use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReverieError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("memory not found: {id}")]
    MemoryNotFound { id: String },

    #[error("scheduled item not found: {id}")]
    ScheduledItemNotFound { id: String },

    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReverieError {
    /// Short error code string, stable across releases — used in logs and
    /// surfaced to collaborators that want to match on failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            ReverieError::Config(_) => "CONFIG_ERROR",
            ReverieError::Database(_) => "DATABASE_ERROR",
            ReverieError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            ReverieError::Embedding(_) => "EMBEDDING_ERROR",
            ReverieError::Channel { .. } => "CHANNEL_ERROR",
            ReverieError::MemoryNotFound { .. } => "MEMORY_NOT_FOUND",
            ReverieError::ScheduledItemNotFound { .. } => "SCHEDULED_ITEM_NOT_FOUND",
            ReverieError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            ReverieError::Constraint(_) => "CONSTRAINT_VIOLATION",
            ReverieError::Serialization(_) => "SERIALIZATION_ERROR",
            ReverieError::Io(_) => "IO_ERROR",
            ReverieError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure is transient (caller should treat as a soft
    /// failure and fall back rather than propagate to the user).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReverieError::LlmProvider(_) | ReverieError::Embedding(_) | ReverieError::Channel { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReverieError>;
