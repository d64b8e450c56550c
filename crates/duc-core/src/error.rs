//! Unified error types for the duc ecosystem
//!
//! Domain-specific failures are folded into [`DucError`] at API boundaries
//! so the coordinator and CLI can pattern-match on the failure class: fatal
//! configuration problems, numerical breakdowns that end a solve but keep
//! the last stable result, and recoverable solver hiccups.

use thiserror::Error;

/// Unified error type for all duc operations.
#[derive(Error, Debug)]
pub enum DucError {
    /// I/O errors (instance files, cache, solution output)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors (unknown algorithm, bad zone count, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Numerical errors (singular Laplacian, NaN consensus target)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// External solver failures surfaced to the caller
    #[error("Solver error: {0}")]
    Solver(String),

    /// Infeasible zone-partitioning program
    #[error("Partitioning error: {0}")]
    Partition(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using DucError.
pub type DucResult<T> = Result<T, DucError>;

impl From<anyhow::Error> for DucError {
    fn from(err: anyhow::Error) -> Self {
        DucError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for DucError {
    fn from(err: serde_json::Error) -> Self {
        DucError::Parse(err.to_string())
    }
}

impl From<String> for DucError {
    fn from(s: String) -> Self {
        DucError::Other(s)
    }
}

impl From<&str> for DucError {
    fn from(s: &str) -> Self {
        DucError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_class_and_message() {
        let err = DucError::Numerical("singular Laplacian".into());
        assert!(err.to_string().contains("Numerical error"));
        assert!(err.to_string().contains("singular Laplacian"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing buses.csv");
        let err: DucError = io_err.into();
        assert!(matches!(err, DucError::Io(_)));
    }

    #[test]
    fn question_mark_propagation() {
        fn inner() -> DucResult<()> {
            Err(DucError::Config("unsupported algorithm".into()))
        }
        fn outer() -> DucResult<()> {
            inner()?;
            Ok(())
        }
        assert!(outer().is_err());
    }
}
