use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProactiveError {
    #[error(transparent)]
    Storage(#[from] reverie_storage::StorageError),

    #[error(transparent)]
    Scheduler(#[from] reverie_scheduler::SchedulerError),
}

pub type Result<T> = std::result::Result<T, ProactiveError>;

impl From<ProactiveError> for reverie_core::ReverieError {
    fn from(e: ProactiveError) -> Self {
        match e {
            ProactiveError::Storage(inner) => inner.into(),
            ProactiveError::Scheduler(inner) => inner.into(),
        }
    }
}
