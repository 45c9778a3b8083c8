//! Errors surfaced by the bridge endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("could not find command: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    /// A command raised; `backtrace` carries the error chain and, when captured, the stack
    #[error("{message}")]
    Execution {
        command: String,
        message: String,
        backtrace: Vec<String>,
    },

    #[error(transparent)]
    Common(#[from] testbridge_common::Error),
}

impl BridgeError {
    /// Build an execution error from an application error
    pub fn execution(command: impl Into<String>, err: &anyhow::Error) -> Self {
        BridgeError::Execution {
            command: command.into(),
            message: err.to_string(),
            backtrace: error_trace(err),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Common(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            BridgeError::Execution { .. } | BridgeError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error chain followed by the captured backtrace, one entry per line
pub fn error_trace(err: &anyhow::Error) -> Vec<String> {
    let mut lines: Vec<String> = err.chain().skip(1).map(|c| format!("caused by: {}", c)).collect();

    let backtrace = err.backtrace();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        lines.extend(backtrace.to_string().lines().map(|l| l.trim_end().to_string()));
    }
    lines
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            BridgeError::NotFound(_) | BridgeError::BadRequest(_) => {
                (status, self.to_string()).into_response()
            }
            BridgeError::Common(e) if e.is_not_found() => (status, e.to_string()).into_response(),
            BridgeError::Execution {
                message, backtrace, ..
            } => (status, Json(json!({ "message": message, "backtrace": backtrace }))).into_response(),
            BridgeError::Common(e) => (
                status,
                Json(json!({ "message": e.to_string(), "backtrace": Vec::<String>::new() })),
            )
                .into_response(),
        }
    }
}
