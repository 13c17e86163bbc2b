// src/core/errors.rs

//! Defines the primary error type for the monitor. Mirrors the exit-code
//! taxonomy surfaced to node agents: `ok`, `not_found`, `conflict`,
//! `invalid_state`, `bad_request`, `internal`.

use thiserror::Error;

/// The main error enum for the monitor core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("node or formation not found: {0}")]
    NotFound(String),

    #[error("transaction conflict, retry: {0}")]
    Conflict(String),

    #[error("invalid catalog state: {0}")]
    InvalidState(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// The stable exit-code name surfaced to agents, per the external
    /// interface's error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            MonitorError::NotFound(_) => "not_found",
            MonitorError::Conflict(_) => "conflict",
            MonitorError::InvalidState(_) => "invalid_state",
            MonitorError::BadRequest(_) => "bad_request",
            MonitorError::Internal(_) => "internal",
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
