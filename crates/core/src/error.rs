//! Error types for osspilot-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for osspilot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for osspilot-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The operation context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation context deadline passed
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// The service answered with a status the protocol does not allow here
    #[error("[{status}] {body}")]
    Protocol { status: u16, body: String },

    /// The object was not recombined within the polling budget
    #[error("Timed out after {0:?} waiting for object recombination")]
    RecombinationTimeout(Duration),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for caller-initiated aborts (cancellation or an expired deadline).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// HTTP status carried by a protocol failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::HttpClient(format!("failed to decode response: {}", err))
        } else if err.is_builder() || err.is_request() {
            Error::HttpClient(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}
