//! # bstt-kernels
//!
//! Dense kernels behind the block-sparse tensor-train ALS solvers.
//!
//! ## Overview
//!
//! - **Face-splitting product** - row-wise Kronecker product of measurement
//!   matrices, used to build design matrices and data stacks
//! - **Kronecker / block-diagonal** - assembly of Gramians and per-block
//!   change-of-basis transforms
//! - **Per-sample contractions** - congruences and projections over stacks
//!   with layout (rank, N, rank), used by the gradient-augmented solver
//! - **Linear algebra** - minimum-norm least squares, ridge solves, sorted
//!   symmetric eigen-decompositions and null-space bases
//! - **Lasso** - coordinate descent with cross-validated regularization
//!
//! ## Quick Start
//!
//! ```rust
//! use scirs2_core::ndarray_ext::Array2;
//! use bstt_kernels::{face_splitting, lstsq_min_norm};
//!
//! let a = Array2::<f64>::ones((10, 3));
//! let b = Array2::<f64>::ones((10, 4));
//! let design = face_splitting(&a.view(), &b.view());
//! assert_eq!(design.shape(), &[10, 12]);
//!
//! let y = design.column(0).to_owned();
//! let x = lstsq_min_norm(&design.view(), &y.view()).unwrap();
//! assert_eq!(x.len(), 12);
//! ```
//!
//! ## SciRS2 Integration
//!
//! Arrays come from `scirs2_core::ndarray_ext`, factorizations from
//! `scirs2_linalg`.

pub mod error;
pub mod lasso;
pub mod linalg;
pub mod products;


pub use error::{KernelError, KernelResult};
pub use lasso::{lasso_coordinate_descent, LassoCv, LassoCvConfig, LassoFit};
pub use linalg::{
    is_identity, is_orthonormal_columns, is_orthonormal_rows, leading_singular_value,
    lstsq_min_norm, null_space, ridge_solve, round_decimals, singular_values, solve_or_lstsq,
    sym_eigh,
};
pub use products::{
    block_diag, contract_mode, face_splitting, kronecker, sample_congruence_left,
    sample_congruence_right, sample_project_left, sample_project_right, sample_triple_product,
    sample_triple_vector,
};
