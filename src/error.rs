// src/error.rs
// Error taxonomy shared by the pipeline, the run controller and the API layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error classification persisted on failed runs and echoed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    AuthError,
    ConnectError,
    SchemaError,
    QueryError,
    ModelError,
    TimeoutError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::QueryError => "query_error",
            ErrorKind::ModelError => "model_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified error used wherever the failure class matters to a caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("schema inspection failed: {0}")]
    Schema(String),
    #[error("query execution failed: {0}")]
    Query(String),
    #[error("model call failed: {0}")]
    Model(String),
    #[error("run exceeded its time budget")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Auth(_) => ErrorKind::AuthError,
            CoreError::Connect(_) => ErrorKind::ConnectError,
            CoreError::Schema(_) => ErrorKind::SchemaError,
            CoreError::Query(_) => ErrorKind::QueryError,
            CoreError::Model(_) => ErrorKind::ModelError,
            CoreError::Timeout => ErrorKind::TimeoutError,
            CoreError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}
