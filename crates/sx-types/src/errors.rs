use thiserror::Error;

/// Main error type for the Sextant search engine
#[derive(Error, Debug)]
pub enum SxError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Submission fault for {fingerprint}: {message}")]
    SubmissionFault { fingerprint: String, message: String },

    #[error(
        "Consistency violation: {message} (proposals: {proposals}, lie table size: {lie_table_len})"
    )]
    ConsistencyViolation {
        message: String,
        proposals: usize,
        lie_table_len: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Search already terminated")]
    Terminated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SxError {
    /// Structural invariant violations abort a run; everything else is local
    /// to the call that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SxError::ConsistencyViolation { .. } | SxError::Terminated)
    }
}

/// Result type alias for Sextant operations
pub type SxResult<T> = Result<T, SxError>;

/// Macro for creating invalid-configuration errors
#[macro_export]
macro_rules! invalid_configuration {
    ($($arg:tt)*) => {
        $crate::SxError::InvalidConfiguration { message: format!($($arg)*) }
    };
}

/// Macro for creating consistency violations: proposal counter, lie table
/// size, then a format string.
#[macro_export]
macro_rules! consistency_error {
    ($proposals:expr, $lie_table_len:expr, $($arg:tt)*) => {
        $crate::SxError::ConsistencyViolation {
            message: format!($($arg)*),
            proposals: $proposals,
            lie_table_len: $lie_table_len,
        }
    };
}

/// Macro for creating settings errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SxError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SxError::ConsistencyViolation {
            message: "told point was never asked".to_string(),
            proposals: 12,
            lie_table_len: 11,
        };

        let text = error.to_string();
        assert!(text.contains("never asked"));
        assert!(text.contains("12"));
        assert!(text.contains("11"));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let sx_error: SxError = io.into();

        match sx_error {
            SxError::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
        assert!(!sx_error.is_fatal());
    }

    #[test]
    fn test_macros() {
        let invalid = invalid_configuration!("expected object, got {}", "array");
        assert!(matches!(invalid, SxError::InvalidConfiguration { .. }));

        let config = config_error!("worker count must be positive: {}", 0);
        assert!(config.to_string().contains("worker count"));

        let violation = consistency_error!(3, 2, "model holds {} observations", 2);
        match violation {
            SxError::ConsistencyViolation {
                proposals,
                lie_table_len,
                ..
            } => assert_eq!((proposals, lie_table_len), (3, 2)),
            _ => panic!("Expected ConsistencyViolation"),
        }
    }
}
