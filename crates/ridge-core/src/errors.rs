//! Error types for RIDGE.
//!
//! Three kinds of failure exist in the engine: bad user input (conflicting or
//! missing configuration), file-system trouble, and violated internal
//! invariants. Input and bug errors abort configuration or the current
//! operation; file errors raised during the steady-state replica cycle are
//! logged by the caller and retried on the next cycle.

use thiserror::Error;

/// Unified error type for all RIDGE operations.
#[derive(Error, Debug)]
pub enum RidgeError {
    /// Configuration/input validation errors
    #[error("Input error: {0}")]
    Input(String),

    /// File access errors with the offending path
    #[error("File error on \"{path}\": {source}")]
    File {
        path: String,
        source: std::io::Error,
    },

    /// I/O errors without a specific path attached
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations; the caller typically aborts
    #[error("Bug: {0}")]
    Bug(String),
}

impl RidgeError {
    /// Creates an input error.
    pub fn input(message: impl Into<String>) -> Self {
        RidgeError::Input(message.into())
    }

    /// Creates a file error with the path that failed.
    pub fn file(path: impl Into<String>, source: std::io::Error) -> Self {
        RidgeError::File {
            path: path.into(),
            source,
        }
    }

    /// Creates a bug error.
    pub fn bug(message: impl Into<String>) -> Self {
        RidgeError::Bug(message.into())
    }

    /// Checks whether this error may resolve on its own if the operation is
    /// retried later (peer files mid-write, NFS lag).
    pub fn is_retriable(&self) -> bool {
        matches!(self, RidgeError::File { .. } | RidgeError::Io(_))
    }
}

/// Result type alias for RIDGE operations.
pub type Result<T> = std::result::Result<T, RidgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let input = RidgeError::input("hillWeight must be positive");
        assert!(matches!(input, RidgeError::Input(_)));

        let file = RidgeError::file(
            "peers.registry",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(matches!(file, RidgeError::File { .. }));

        let bug = RidgeError::bug("projection without a gradient grid");
        assert!(matches!(bug, RidgeError::Bug(_)));
    }

    #[test]
    fn test_retriable_errors() {
        let file = RidgeError::file(
            "walker-2.hills",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        );
        assert!(file.is_retriable());
        assert!(!RidgeError::input("bad key").is_retriable());
        assert!(!RidgeError::bug("oops").is_retriable());
    }

    #[test]
    fn test_file_error_message_names_path() {
        let err = RidgeError::file(
            "out.pmf",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("out.pmf"));
    }
}
