//! # AppError
//!
//! Centralized error handling for the Shield moderation pipeline.
//! Every exposed operation terminates in one of these; none of them crash the process.

use thiserror::Error;

/// The primary error type for all moderation operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Record not found (e.g., Candidate, SuspectGroup, KeyRequest)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Malformed or missing input, rejected before any I/O
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unknown API token / reviewer passcode
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transition not allowed from the current state, or duplicate unique key
    #[error("conflict: {0}")]
    Conflict(String),

    /// The group directory could not be reached or answered with garbage
    #[error("external dependency failed: {0}")]
    ExternalDependency(String),

    /// Local infrastructure failure (e.g., a record set could not be written)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn external(err: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        AppError::ExternalDependency(format!("{err:#}"))
    }

    pub fn internal(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

/// A specialized Result type for Shield logic.
pub type Result<T> = std::result::Result<T, AppError>;
