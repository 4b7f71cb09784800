//! Error types for OrgPulse.
//!
//! Library crates use [`OrgPulseError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.
//!
//! A paginated fetch that fails mid-sequence is NOT an error: the fetchers
//! return [`crate::FetchOutcome`] with a partial status instead, so partial
//! success stays a first-class value.

use std::path::PathBuf;

/// Top-level error type for all OrgPulse operations.
#[derive(Debug, thiserror::Error)]
pub enum OrgPulseError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error on a required request.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Roster parsing succeeded structurally but yielded zero members.
    /// Treated as a parse failure, not a valid empty organization.
    #[error("roster parsing produced no members (page layout change or wrong page?)")]
    EmptyRoster,

    /// Cache store error (open/read of the durable tier).
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OrgPulseError>;

impl OrgPulseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
