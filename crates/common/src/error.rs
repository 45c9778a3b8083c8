//! Error types for TestBridge

use thiserror::Error;

/// Result type alias using TestBridge Error
pub type Result<T> = std::result::Result<T, Error>;

/// TestBridge error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Hook {hook} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("could not find command: {name}")]
    CommandNotFound { name: String },

    #[error("fail to execute {command}: {message}")]
    CommandExecution { command: String, message: String },

    #[error("Cassette error: {0}")]
    Cassette(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should be reported to an HTTP caller as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::CommandNotFound { .. })
    }
}
