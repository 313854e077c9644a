use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not a leader")]
    NotLeader,

    #[error("Leader unknown, retry later")]
    LeaderUnknown,

    #[error("Leader {0} unreachable")]
    LeaderUnreachable(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Config key not found: {0}")]
    KeyNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl From<serde_json::Error> for RaftError {
    fn from(err: serde_json::Error) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

impl RaftError {
    /// Errors a client can resolve by retrying once the cluster has settled.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RaftError::LeaderUnknown
                | RaftError::LeaderUnreachable(_)
                | RaftError::NotLeader
                | RaftError::Timeout
        )
    }
}
