//! Error types for deploywatch-core

use thiserror::Error;

/// Main error type for the deploywatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, dropped push channel, or non-success HTTP status
    #[error("transport error: {0}")]
    Transport(String),

    /// Push payload that could not be parsed as a job event
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// History endpoint returned an unusable response
    #[error("history fetch failed: {0}")]
    HistoryFetch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error is a recoverable transport failure.
    ///
    /// Transport failures are handled locally (fallback or retry) and never
    /// surface as a job failure on their own.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type alias for deploywatch-core
pub type Result<T> = std::result::Result<T, Error>;
