//! Error types for kernel and dense linear algebra operations
//!
//! Kernel errors carry the operation name so that failures deep inside a sweep
//! can be traced back to the contraction or factorization that produced them.

use std::fmt;

/// Error type for kernel operations
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Dimension mismatch between operands
    DimensionMismatch {
        operation: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
        context: String,
    },

    /// Empty input not allowed
    EmptyInput {
        operation: String,
        parameter: String,
    },

    /// A factorization or solve in the linear algebra backend failed
    Factorization { operation: String, message: String },

    /// Generic operation error with context
    OperationError { operation: String, message: String },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::DimensionMismatch {
                operation,
                expected,
                actual,
                context,
            } => write!(
                f,
                "{}: dimension mismatch - expected {:?}, got {:?}. {}",
                operation, expected, actual, context
            ),

            KernelError::EmptyInput {
                operation,
                parameter,
            } => write!(
                f,
                "{}: empty input not allowed for parameter '{}'",
                operation, parameter
            ),

            KernelError::Factorization { operation, message } => {
                write!(f, "{}: factorization failed: {}", operation, message)
            }

            KernelError::OperationError { operation, message } => {
                write!(f, "{}: {}", operation, message)
            }
        }
    }
}

impl std::error::Error for KernelError {}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Create a dimension mismatch error
    pub fn dimension_mismatch(
        operation: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
        context: impl Into<String>,
    ) -> Self {
        KernelError::DimensionMismatch {
            operation: operation.into(),
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Create an empty input error
    pub fn empty_input(operation: impl Into<String>, parameter: impl Into<String>) -> Self {
        KernelError::EmptyInput {
            operation: operation.into(),
            parameter: parameter.into(),
        }
    }

    /// Create a factorization error from a backend failure
    pub fn factorization(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        KernelError::Factorization {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a generic operation error
    pub fn operation_error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        KernelError::OperationError {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = KernelError::dimension_mismatch(
            "face_splitting",
            vec![10, 5],
            vec![8, 3],
            "Row counts must match",
        );

        let msg = format!("{}", err);
        assert!(msg.contains("face_splitting"));
        assert!(msg.contains("dimension mismatch"));
        assert!(msg.contains("[10, 5]"));
        assert!(msg.contains("[8, 3]"));
    }

    #[test]
    fn test_empty_input_display() {
        let err = KernelError::empty_input("block_diag", "blocks");

        let msg = format!("{}", err);
        assert!(msg.contains("block_diag"));
        assert!(msg.contains("empty input"));
    }

    #[test]
    fn test_factorization_display() {
        let err = KernelError::factorization("lstsq_min_norm", "matrix contains NaN");
        let msg = format!("{}", err);
        assert!(msg.contains("lstsq_min_norm"));
        assert!(msg.contains("factorization failed"));
        assert!(msg.contains("NaN"));
    }
}
