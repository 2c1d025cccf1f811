//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("invalid stream: {0}")]
    InvalidStream(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid batch mode: {0}")]
    InvalidMode(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
