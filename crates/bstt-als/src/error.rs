//! Error types for the ALS solvers

use bstt_core::CoreError;
use bstt_kernels::KernelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlsError {
    #[error("Tensor train error: {0}")]
    Core(#[from] CoreError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown method '{0}', expected 'l1' or 'l2'")]
    InvalidMethod(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid Gramian for mode {mode}: {message}")]
    InvalidGramian { mode: usize, message: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Stack entry missing on the {side} side at position {position}")]
    MissingStack { side: &'static str, position: usize },
}

pub type Result<T> = std::result::Result<T, AlsError>;
