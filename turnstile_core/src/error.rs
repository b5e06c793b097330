use thiserror::Error;

/// Failure to obtain a per-key lock.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("lock acquisition cancelled")]
    Cancelled,

    #[error("lock registry could not grow")]
    ResourceExhausted,
}

/// Errors surfaced by a turn. A discarded stale replay is not one of them.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn cancelled")]
    Cancelled,

    #[error("resources exhausted while acquiring the conversation lock")]
    ResourceExhausted,

    #[error("failed to load turn state: {0}")]
    StateLoad(anyhow::Error),

    #[error("turn handler failed: {0}")]
    Downstream(anyhow::Error),

    #[error("failed to persist turn state: {0}")]
    Persistence(anyhow::Error),
}

impl From<LockError> for TurnError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Cancelled => Self::Cancelled,
            LockError::ResourceExhausted => Self::ResourceExhausted,
        }
    }
}
