//! Error taxonomy for the alert engine.

use thiserror::Error;

use crate::alert::AlertStatus;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Alert {0} not found")]
    AlertNotFound(String),

    #[error("Rule {0} not found")]
    RuleNotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Rule {0} already exists")]
    DuplicateRule(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for SentinelError {
    fn from(err: rusqlite::Error) -> Self {
        SentinelError::Store(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for SentinelError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        SentinelError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Store(format!("document encoding: {err}"))
    }
}
