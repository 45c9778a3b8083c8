//! Error types for the server lifecycle

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    SpawnFailure(String),

    #[error("Server failed to start on {host}:{port} after {:.1} seconds", elapsed.as_secs_f64())]
    ReadinessTimeout {
        host: String,
        port: u16,
        elapsed: Duration,
    },

    #[error("Hook {hook} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("{0} not found. Install it or add it to PATH")]
    RunnerNotFound(String),

    #[error("Test runner exited unsuccessfully: {0}")]
    RunnerFailed(String),

    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(testbridge_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<testbridge_common::Error> for E2eError {
    fn from(e: testbridge_common::Error) -> Self {
        match e {
            testbridge_common::Error::Hook { hook, message } => E2eError::Hook { hook, message },
            testbridge_common::Error::InvalidConfig(msg) => E2eError::Config(msg),
            other => E2eError::Store(other),
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
