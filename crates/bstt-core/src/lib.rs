//! # bstt-core
//!
//! Block-sparse tensor trains and the collaborator traits the ALS solvers
//! drive.
//!
//! ## Overview
//!
//! - [`Block`] / [`BlockSparseTensor`] - sparsity descriptors and the flat
//!   coefficient layout of a block-sparse core
//! - [`Direction`] - sweep direction, parsed strictly from `"left"`/`"right"`
//! - [`BlockSparseTrain`], [`SelectionSystem`], [`SharedWeightSystem`] - the
//!   narrow interfaces solvers use to read and replace components and to move
//!   the orthogonality center
//! - [`BlockSparseTT`], [`BlockSparseTTSystem`], [`BlockSparseTTSystem2`] -
//!   in-process implementations with slice-wise orthogonalizing moves
//!
//! ## Quick Start
//!
//! ```rust
//! use bstt_core::{Block, BlockSparseTT, BlockSparseTrain, Direction};
//!
//! // Two modes of dimension 2, every bond split into single-index slices
//! let blocks = vec![
//!     vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
//!     vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..1, 0..1])],
//! ];
//! let mut tt = BlockSparseTT::random(&[2, 2], blocks, 42).unwrap();
//!
//! let singular_values = tt.move_core(Direction::Right).unwrap();
//! assert_eq!(tt.core_position(), 1);
//! assert_eq!(singular_values.len(), 2);
//! ```
//!
//! ## SciRS2 Integration
//!
//! Arrays come from `scirs2_core::ndarray_ext`, SVDs from `scirs2_linalg`,
//! seeded randomness from `scirs2_core::random`.

pub mod block;
pub mod direction;
pub mod error;
pub mod shared;
pub mod system;
pub mod traits;
pub mod tt;

mod train;


pub use block::{block_mask, blocks_overlap, Block, BlockSparseTensor};
pub use direction::Direction;
pub use error::{CoreError, Result};
pub use shared::BlockSparseTTSystem2;
pub use system::{select_equation, BlockSparseTTSystem};
pub use traits::{BlockSparseTrain, SelectionSystem, SharedWeightSystem};
pub use tt::BlockSparseTT;
