use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(#[from] reverie_storage::StorageError),

    #[error("no channel registered to deliver to user {user_id}")]
    NoChannel { user_id: String },

    #[error("delivery failed: {0}")]
    Delivery(#[from] reverie_core::ReverieError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for reverie_core::ReverieError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(e) => e.into(),
            SchedulerError::NoChannel { user_id } => reverie_core::ReverieError::Channel {
                channel: "unknown".to_string(),
                reason: format!("no channel registered for user {user_id}"),
            },
            SchedulerError::Delivery(e) => e,
        }
    }
}
