// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid quality: {0} (expected 1..=100)")]
    InvalidQuality(u8),

    #[error("Invalid image URL: {0}")]
    InvalidImageUrl(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Malformed message body: {0}")]
    MalformedBody(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
