//! Error types for block-sparse tensor trains

use scirs2_linalg::LinalgError;
use thiserror::Error;

use crate::direction::Direction;

/// Errors raised by block-sparse tensor trains and their collaborators
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown direction. Expected 'left' or 'right' but got '{0}'")]
    InvalidDirection(String),

    #[error("Cannot move core {direction} from position {position} in a train of order {order}")]
    CoreOutOfRange {
        direction: Direction,
        position: usize,
        order: usize,
    },

    #[error("Invalid position {position} for a train of order {order}")]
    InvalidPosition { position: usize, order: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid block structure at component {position}: {message}")]
    InvalidBlocks { position: usize, message: String },

    #[error("Coefficient count mismatch: blocks hold {expected} entries, got {got}")]
    CoefficientCount { expected: usize, got: usize },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Inconsistent system: {0}")]
    Inconsistent(String),

    #[error("Linear algebra error: {0}")]
    Linalg(#[from] LinalgError),
}

/// Result type for block-sparse tensor train operations
pub type Result<T> = std::result::Result<T, CoreError>;
