use thiserror::Error;

pub type LogResult<T> = Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    /// Backend unreachable or refusing requests; retryable
    #[error("Message log unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record failed its checksum or could not be framed
    #[error("Corrupted log: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for LogError {
    fn from(err: bincode::Error) -> Self {
        LogError::Serialization(err.to_string())
    }
}
