//! Error types for the omnivo library.
//!
//! All errors use the `thiserror` crate for automatic trait implementations.
//! Per-view calibration failures (pattern not found, operator rejection) are
//! absorbed locally with a log entry and never appear here; the variants below
//! are the conditions that surface to the caller.

use thiserror::Error;

/// Main result type used throughout the omnivo library
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the omnivo library
#[derive(Debug, Error)]
pub enum Error {
    /// Calibration info file not found
    #[error("calibration info file not found: {0}")]
    ConfigMissing(String),

    /// Calibration info file header could not be parsed
    #[error("malformed calibration info file: {0}")]
    ConfigMalformed(String),

    /// Every calibration view was rejected or failed extraction
    #[error("no valid calibration views")]
    NoValidViews,

    /// The solver reported non-convergence to a non-finite state
    #[error("solver failed: {0}")]
    SolverFailed(String),

    /// RANSAC could not draw a well-spanned minimal sample
    #[error("RANSAC could not find a non-degenerate sample")]
    DegenerateSample,

    /// A camera projection was invalid where a valid one was required
    #[error("invalid camera projection")]
    ProjectionInvalid,

    /// Invalid input parameters
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO related errors (file loading, persisting parameters)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::ConfigMissing("calibInfo.txt".to_string());
        assert_eq!(
            error.to_string(),
            "calibration info file not found: calibInfo.txt"
        );
        assert_eq!(
            Error::NoValidViews.to_string(),
            "no valid calibration views"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);
        match error {
            Error::Io(inner) => assert!(inner.to_string().contains("file not found")),
            _ => panic!("expected IO error"),
        }
    }
}
