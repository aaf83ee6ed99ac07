//! Error types for the FilterSync engine.
//!
//! Backend failures are split by the path they occur on: [`FetchError`] for
//! request/response calls (catalog and counter fetches) and [`StreamError`]
//! for the notification transport. [`EngineError`] wraps both for callers of
//! the engine's public operations.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors from the catalog or counter backend.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not in the expected shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from the notification transport.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The underlying connection failed.
    #[error("notification transport error: {0}")]
    Transport(String),

    /// A single message could not be decoded. The stream stays usable.
    #[error("invalid notification: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("notification stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine was disposed before the operation could complete.
    #[error("engine has been disposed")]
    Disposed,
}

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
