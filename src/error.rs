use crate::execution_loop::RecoveryAttempt;
use crate::executor::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MendError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("No query generated: {0}")]
    Extraction(String),

    #[error("Query blocked: {0}")]
    Blocked(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Recovery exhausted after {} attempt(s): {last_error}", attempts.len())]
    RecoveryExhausted {
        last_error: ExecutionError,
        attempts: Vec<RecoveryAttempt>,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MendError {
    /// The underlying driver error, if this failure came from the database.
    pub fn driver_error(&self) -> Option<&ExecutionError> {
        match self {
            MendError::Execution(e) => Some(e),
            MendError::RecoveryExhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }

    /// Rewrites attempted before giving up (empty for non-recovery errors).
    pub fn attempts(&self) -> &[RecoveryAttempt] {
        match self {
            MendError::RecoveryExhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, MendError>;
