//! # bstt - Block-Sparse Tensor Train regression
//!
//! This is the **meta crate** that re-exports the bstt components for
//! convenient access.
//!
//! ## Quick Start
//!
//! ```
//! use bstt::prelude::*;
//! use scirs2_core::ndarray_ext::Array2;
//!
//! let blocks = vec![
//!     vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
//!     vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..1, 0..1])],
//! ];
//! let tt = BlockSparseTT::random(&[2, 2], blocks, 3)?;
//! let measurements: Vec<Array2<f64>> = (0..2)
//!     .map(|m| Array2::from_shape_fn((16, 2), |(n, j)| ((n + 2 * m) as f64 / 8.0 - 1.0).powi(j as i32)))
//!     .collect();
//! let values = measurements[0].column(1).mapv(|x| 2.0 * x + 1.0);
//!
//! let config = AlsConfig::default().with_method(Method::L2).with_max_sweeps(5);
//! let mut solver = AlsRegression::with_config(tt, measurements, values, LocalGramians::identity(&[2, 2]), config)?;
//! let report = solver.run()?;
//! assert!(report.sweeps <= 5);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Components
//!
//! ### Trains and collaborators ([`core`])
//!
//! Block descriptors, the flat coefficient layout of a block-sparse core,
//! and the three model kinds the solvers fit.
//!
//! ```
//! use bstt::core::{Block, Direction};
//!
//! let block = Block::from([0..1, 0..2, 1..3]);
//! assert_eq!(block.size(), 4);
//! assert_eq!("left".parse::<Direction>().unwrap(), Direction::Left);
//! ```
//!
//! ### Dense kernels ([`kernels`])
//!
//! Face-splitting products, Kronecker assembly, least squares, eigen
//! decompositions and cross-validated Lasso.
//!
//! ```
//! use bstt::kernels::face_splitting;
//! use scirs2_core::ndarray_ext::Array2;
//!
//! let a = Array2::<f64>::ones((5, 2));
//! let b = Array2::<f64>::ones((5, 3));
//! assert_eq!(face_splitting(&a.view(), &b.view()).shape(), &[5, 6]);
//! ```
//!
//! ### Solvers ([`als`])
//!
//! Stack maintenance, subproblem assembly and the sweep engine for the
//! regression, gradient, selection-system and shared-weight solvers.

pub use bstt_als as als;
pub use bstt_core as core;
pub use bstt_kernels as kernels;

pub mod prelude {
    //! Prelude module for convenient imports
    //!
    //! # Example
    //!
    //! ```
    //! use bstt::prelude::*;
    //!
    //! let config = AlsConfig::default().with_method(Method::L2);
    //! assert!(config.validate().is_ok());
    //! ```

    // Models
    pub use crate::core::{
        Block, BlockSparseTT, BlockSparseTTSystem, BlockSparseTTSystem2, BlockSparseTrain,
        Direction, SelectionSystem, SharedWeightSystem,
    };

    // Solvers
    pub use crate::als::{
        AlsConfig, AlsGradient, AlsRegression, AlsSelectionSystem, AlsSharedSystem, GroupSizeCap,
        LocalGramians, LocalSolver, Method, SweepReport, Termination,
    };

    // Common kernels
    pub use crate::kernels::{face_splitting, kronecker, lstsq_min_norm};
}
