//! Error types for the D-RM training pipeline

use thiserror::Error;

/// Result type alias for D-RM training operations
pub type Result<T> = std::result::Result<T, DrmError>;

/// Error type covering the numeric kernel, model assembly and I/O surface
#[derive(Error, Debug)]
pub enum DrmError {
    /// Invalid configuration or option value
    #[error("configuration error: {message}")]
    ConfigurationError {
        /// Error message
        message: String,
        /// Option field that caused the error
        field: Option<String>,
    },

    /// Invalid argument to a public API
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Error message
        message: String,
    },

    /// Dimension mismatch between operands
    #[error("dimension mismatch in {operation}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension found
        actual: usize,
        /// Operation where the mismatch occurred
        operation: String,
    },

    /// Numerical failure: singular matrix, non-SPD Gramian, non-finite value
    #[error("numerical error in {operation}: {message}")]
    NumericalError {
        /// Error message
        message: String,
        /// Operation that failed
        operation: String,
    },

    /// An iterative method ran out of its iteration budget
    #[error("{algorithm} failed to converge after {iterations} iterations (residual {residual:.3e})")]
    ConvergenceFailure {
        /// Algorithm that failed to converge
        algorithm: String,
        /// Number of iterations performed
        iterations: usize,
        /// Final residual or error measure
        residual: f64,
    },

    /// I/O failure on the export/import surface
    #[error("io error: {message}")]
    IoError {
        /// Error message
        message: String,
        /// File path if applicable
        path: Option<String>,
        /// Underlying I/O error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Malformed data while parsing a textual block
    #[error("parse error: {message}")]
    ParseError {
        /// Error message
        message: String,
    },
}

impl DrmError {
    /// Dimension mismatch with operation context
    pub fn dimension(operation: &str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            expected,
            actual,
            operation: operation.to_string(),
        }
    }

    /// Numerical failure with operation context
    pub fn numerical(operation: &str, message: impl Into<String>) -> Self {
        Self::NumericalError {
            message: message.into(),
            operation: operation.to_string(),
        }
    }

    /// Invalid input with a plain message
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Configuration error tied to a named option field
    pub fn config_field(field: &str, message: &str) -> Self {
        Self::ConfigurationError {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// True for soft failures: the caller may keep a best-so-far result
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConvergenceFailure { .. })
    }
}

impl From<std::io::Error> for DrmError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_is_recoverable() {
        let err = DrmError::ConvergenceFailure {
            algorithm: "rprop".to_string(),
            iterations: 5000,
            residual: 1e-3,
        };
        assert!(err.is_recoverable());

        let err = DrmError::dimension("step", 4, 3);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = DrmError::numerical("cholesky", "diagonal square is -0.5 at row 2");
        let text = err.to_string();
        assert!(text.contains("cholesky"));
        assert!(text.contains("row 2"));
    }
}
