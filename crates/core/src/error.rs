// Central Error Type for the Pipeline

use crate::port::TranscodeError;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Queue declaration error: {0}")]
    QueueDeclaration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later can reasonably succeed.
    ///
    /// Drives requeue decisions in the worker and reconnect decisions at startup.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transcode(e) => e.is_transient(),
            AppError::Connection(_)
            | AppError::Channel(_)
            | AppError::Query(_)
            | AppError::Persist(_)
            | AppError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Connection("refused".into()).is_transient());
        assert!(AppError::Persist("disk full".into()).is_transient());
        assert!(!AppError::InvalidMessage("garbage".into()).is_transient());
        assert!(!AppError::Transcode(TranscodeError::Decode("bad header".into())).is_transient());
        assert!(AppError::Transcode(TranscodeError::Fetch {
            url: "http://x".into(),
            status: Some(503),
            message: "unavailable".into(),
        })
        .is_transient());
    }
}
