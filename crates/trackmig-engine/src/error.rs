//! Error types for the migration engine
//!
//! Layered the same way failures are handled:
//! - `BackendError`: one failed call to a source or destination system
//! - `RetryError`: a call that stayed failed after the retry policy ran
//! - `CheckpointError`: progress could not be loaded or persisted
//! - `MigrationError`: a run could not start or had to halt

use crate::state::RunState;
use std::path::PathBuf;
use trackmig_core::{ConfigError, MappingError};

/// Failure of a single backend call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Network failure or 5xx-class response
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No response within the backend's deadline
    #[error("request timed out")]
    Timeout,

    /// Credentials refused; may be a token refresh race
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Backend refused the payload (validation error)
    #[error("rejected: {0}")]
    Rejected(String),

    /// Backend answered with something we cannot interpret
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Check if another attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout | Self::Unauthorized(_)
        )
    }
}

/// Outcome of a call that did not succeed under the retry policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed with a transient error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BackendError },

    /// A permanent error; not retried
    #[error(transparent)]
    Permanent(BackendError),
}

impl RetryError {
    /// Check if the backend looked unreachable rather than refusing the call
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The last underlying backend error
    #[must_use]
    pub fn backend_error(&self) -> &BackendError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent(err) => err,
        }
    }
}

/// Checkpoint persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure
    #[error("checkpoint i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored checkpoint is not valid JSON for the schema
    #[error("corrupt checkpoint at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Stored checkpoint uses an unknown schema version
    #[error("unsupported checkpoint version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    /// Stored checkpoint belongs to another source
    #[error("checkpoint belongs to source `{found}`, not `{expected}`")]
    SourceMismatch { expected: String, found: String },
}

/// Run-level failures
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Identity mapping could not be loaded
    #[error("identity mapping unavailable: {0}")]
    Mapping(#[from] MappingError),

    /// Checkpoint could not be loaded or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Source enumeration failed after retries
    #[error("source enumeration failed: {0}")]
    Source(RetryError),

    /// Destination failed for too many consecutive pages
    #[error("destination unreachable for {pages} consecutive pages")]
    DestinationUnreachable { pages: u32 },

    /// Run state machine violated
    #[error("illegal run state transition: {from:?} -> {to:?}")]
    IllegalTransition { from: RunState, to: RunState },
}

impl MigrationError {
    /// Check for the error kinds that abort a run before any record is processed
    ///
    /// A checkpoint that fails to save mid-run ends the run as
    /// `FinalStatus::Failed` instead of surfacing as an error.
    #[inline]
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Mapping(_) | Self::Checkpoint(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Unavailable("503".into()).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Unauthorized("expired".into()).is_transient());
        assert!(!BackendError::Rejected("summary required".into()).is_transient());
        assert!(!BackendError::Protocol("bad json".into()).is_transient());
    }

    #[test]
    fn retry_error_exposes_last_error() {
        let err = RetryError::Exhausted {
            attempts: 3,
            last: BackendError::Timeout,
        };
        assert!(err.is_exhausted());
        assert_eq!(err.backend_error(), &BackendError::Timeout);
        assert_eq!(err.to_string(), "gave up after 3 attempts: request timed out");
    }

    #[test]
    fn permanent_is_transparent() {
        let err = RetryError::Permanent(BackendError::Rejected("title empty".into()));
        assert_eq!(err.to_string(), "rejected: title empty");
        assert!(!err.is_exhausted());
    }

    #[test]
    fn startup_classification() {
        let err = MigrationError::Mapping(MappingError::MalformedHeader("x".into()));
        assert!(err.is_startup());
        let mismatch = CheckpointError::SourceMismatch {
            expected: "jira".into(),
            found: "asana".into(),
        };
        assert!(MigrationError::Checkpoint(mismatch).is_startup());
        assert!(!MigrationError::DestinationUnreachable { pages: 3 }.is_startup());
    }
}
