//! # Error Types
//!
//! Infrastructure and validation errors shared across the workspace. All
//! errors use `thiserror` for derive-based `Display` and `Error`.
//!
//! ## Design
//!
//! - [`PiplError`] is for failures the caller cannot act on by changing its
//!   input: storage outages, queue failures, lease contention. These
//!   propagate to the job worker, which retries them.
//! - Business outcomes (threshold not met, paid user, ...) are NOT errors at
//!   this level. They are typed step responses in `pipl-enforcement`.
//! - [`ValidationError`] covers newtype construction and config checks.

use thiserror::Error;

/// Top-level infrastructure error for the PIPL compliance engine.
#[derive(Error, Debug)]
pub enum PiplError {
    /// Input validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence layer failure (connection, query, decode).
    #[error("storage error: {0}")]
    Storage(String),

    /// Job queue failure.
    #[error("job queue error: {0}")]
    Queue(String),

    /// The user directory could not be reached.
    #[error("user directory error: {0}")]
    Directory(String),

    /// A cooperative lease could not be acquired after all retries.
    #[error("lease {key} unavailable after {attempts} attempts")]
    LeaseUnavailable {
        /// The lease key.
        key: String,
        /// How many acquisition attempts were made.
        attempts: u32,
    },

    /// A subject lifecycle transition was rejected.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PiplError {
    /// Whether the job worker should retry the unit of work that raised this.
    ///
    /// Validation and configuration errors are deterministic, so retrying
    /// them only burns attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Queue(_) | Self::Directory(_) | Self::Io(_)
        )
    }
}

/// Errors from constructing validated domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Country code is not a two-letter ISO 3166-1 alpha-2 code.
    #[error("invalid country code: \"{0}\" (expected two ASCII letters)")]
    InvalidCountryCode(String),

    /// A configured threshold is out of range.
    #[error("invalid threshold {name}: {reason}")]
    InvalidThreshold {
        /// The threshold field name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The covered-country set is empty.
    #[error("covered country set must not be empty")]
    EmptyCoveredCountries,
}

/// Failure reported by the user directory collaborator.
///
/// `Rejected` means the directory answered and refused the action (a
/// business failure surfaced to the caller as a step response);
/// `Unavailable` means it could not answer at all (retried by the worker).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory refused the action.
    #[error("{0}")]
    Rejected(String),

    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for PiplError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err.to_string())
    }
}
