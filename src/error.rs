//! ImageDeck error types

use thiserror::Error;

/// ImageDeck error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reaper error
    #[error("Reaper error: {0}")]
    Reaper(String),

    /// Download error
    #[error("Download error: {0}")]
    Download(String),

    /// Control server error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ImageDeck operations
pub type Result<T> = std::result::Result<T, Error>;
