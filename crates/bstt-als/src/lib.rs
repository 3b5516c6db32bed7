//! # bstt-als - ALS sweeps for block-sparse tensor trains
//!
//! Fits block-sparse tensor trains to scattered samples by alternating least
//! squares. One core is optimized at a time; left and right stacks hold the
//! contraction of everything on either side of it and are updated
//! incrementally whenever the core moves.
//!
//! ## Solvers
//!
//! | Solver | Model | Local solve |
//! |--------|-------|-------------|
//! | [`AlsRegression`] | scalar regression | least squares (`l2`) or whitened cross-validated Lasso (`l1`), optional rank growth |
//! | [`AlsGradient`] | gradient samples | square normal equations |
//! | [`AlsSelectionSystem`] | equations coupled by selection matrices | ridge per slot |
//! | [`AlsSharedSystem`] | equations drawing cores from a shared pool | least squares plus bond re-basis |
//!
//! Every solver implements [`LocalSolver`], and [`SweepEngine`] drives the
//! sweeps and the termination checks:
//!
//! ```text
//! sweep: microstep + move right until right_sweep_end
//!        microstep + move left until position 0
//! stop:  target residual > divergence > stall > sweep budget
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use bstt_als::{AlsConfig, AlsRegression, LocalGramians, Method};
//! use bstt_core::{Block, BlockSparseTT, BlockSparseTrain};
//! use scirs2_core::ndarray_ext::Array2;
//!
//! let blocks = vec![
//!     vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
//!     vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..1, 0..1])],
//! ];
//! let truth = BlockSparseTT::random(&[2, 2], blocks.clone(), 7)?;
//! let measurements: Vec<Array2<f64>> = (0..2)
//!     .map(|m| Array2::from_shape_fn((20, 2), |(n, j)| ((n + m) as f64 / 10.0 - 1.0).powi(j as i32)))
//!     .collect();
//! let values = truth.evaluate(&measurements)?.column(0).to_owned();
//!
//! let tt = BlockSparseTT::random(&[2, 2], blocks, 8)?;
//! let gramians = LocalGramians::identity(&[2, 2]);
//! let config = AlsConfig::default().with_method(Method::L2).with_max_sweeps(10);
//! let mut solver = AlsRegression::with_config(tt, measurements, values, gramians, config)?;
//! let report = solver.run()?;
//! assert!(report.sweeps <= 10);
//! assert!(report.final_residual <= report.initial_residual);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Logging
//!
//! Solvers emit `tracing` events: one `info` event per sweep and at
//! termination, `debug` events with the residual before and after every
//! microstep and core move. [`init_tracing`] installs a subscriber driven by
//! `RUST_LOG` and `BSTT_LOG_FORMAT`.

pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod gradient;
pub mod gramian;
pub mod regression;
pub mod shared;
pub mod stack;
pub mod system;
pub mod tracing_support;

#[cfg(test)]
mod property_tests;

pub use config::{AlsConfig, GroupSizeCap, LassoCvConfig, Method};
pub use engine::{LocalSolver, SweepEngine, SweepReport, Termination, TerminationPolicy};
pub use error::{AlsError, Result};
pub use gradient::{AlsGradient, GradientFrame, GradientSubproblem};
pub use gramian::LocalGramians;
pub use regression::{AlsRegression, RegressionFrame, RegressionSubproblem};
pub use shared::{AlsSharedSystem, SharedSubproblem, SHARED_MIN_DECREASE};
pub use stack::StackPair;
pub use system::{AlsSelectionSystem, SlotProblem, SystemFrame, SystemSubproblem};
pub use tracing_support::{init_tracing, TracingConfig, TracingFormat};
