//! Shared error taxonomy for the daemon subsystems
//!
//! Mirrors the small fixed set of failure classes the orchestration layer
//! distinguishes: bad input, bad lifecycle ordering, exhausted capacity,
//! missing entries, retryable hardware faults, and unrecoverable setup
//! failures.

use thiserror::Error;

/// Errors surfaced by the orchestration subsystems
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input (zero-duration timer, unregistered connection kind)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong lifecycle phase
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No free slot or queue capacity left
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Lookup for a timer or connection that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Hardware call failed but the caller's retry logic is expected to cope
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unexpected resource failure during setup, surfaced and not retried
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::ResourceExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transient("codec busy".into()).is_retryable());
        assert!(Error::ResourceExhausted("no timer slot".into()).is_retryable());
        assert!(!Error::NotFound("timer 7".into()).is_retryable());
        assert!(!Error::Fatal("allocation failed".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::InvalidArgument("duration must be nonzero".into());
        assert!(err.to_string().contains("duration must be nonzero"));
    }
}
