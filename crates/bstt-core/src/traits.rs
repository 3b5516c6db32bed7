//! Collaborator traits consumed by the ALS solvers
//!
//! Solvers never touch train storage directly. They read components and block
//! descriptors, replace whole components, and ask the train to move its
//! orthogonality center. Implementations own the invariants: block sparsity,
//! bond slice bookkeeping and the orthogonality of cores behind the center.

use std::ops::Range;

use scirs2_core::ndarray_ext::{Array1, Array2, ArrayD, ArrayViewD};

use crate::block::Block;
use crate::direction::Direction;
use crate::error::Result;

/// Block-sparse tensor train with a movable orthogonality center
///
/// Components are dense arrays whose first axis is the left rank, second the
/// physical mode and last the right rank. Plain trains have 3-way components,
/// selection systems add an equation-slot axis before the right rank.
pub trait BlockSparseTrain {
    fn order(&self) -> usize;

    /// Physical dimension of every mode
    fn dimensions(&self) -> &[usize];

    fn component(&self, position: usize) -> &ArrayD<f64>;

    /// Replace a component; its shape must not change
    fn set_component(&mut self, position: usize, core: ArrayD<f64>) -> Result<()>;

    fn blocks(&self, position: usize) -> &[Block];

    fn core_position(&self) -> usize;

    /// Set the core position without orthogonalizing anything
    fn assume_core_position(&mut self, position: usize);

    /// Move the core one step, orthogonalizing the vacated component
    ///
    /// Returns the singular values of the re-orthogonalized bond, indexed by
    /// rank position on that bond.
    fn move_core(&mut self, direction: Direction) -> Result<Array1<f64>>;

    /// Evaluate the train on per-mode measurements of shape (samples, dimension)
    ///
    /// Returns one column per output: a single column for scalar trains, one
    /// per equation for systems.
    fn evaluate(&self, measurements: &[Array2<f64>]) -> Result<Array2<f64>>;

    /// Distinct ranges along `axis` over the blocks of the current core, sorted
    fn unique_slices(&self, axis: usize) -> Vec<Range<usize>>;

    /// Blocks of component `position` whose range along `axis` equals `slice`
    fn blocks_of_slice(&self, position: usize, slice: &Range<usize>, axis: usize) -> Vec<Block>;

    /// Largest size slice `slice_index` of bond `position|position+1` may grow to
    fn max_size(&self, slice_index: usize, position: usize, cap: usize) -> usize;

    /// Grow slice `slice_index` of the bond behind (`Left`) or ahead of
    /// (`Right`) the core by one rank index
    ///
    /// `vector` fills the new index in the component away from the core and
    /// `padding` fills it in the current core.
    fn increase_block(
        &mut self,
        slice_index: usize,
        vector: ArrayViewD<f64>,
        padding: ArrayViewD<f64>,
        direction: Direction,
    ) -> Result<()>;
}

/// System of equations whose 4-way cores share weights through a selection matrix
///
/// Components have layout (left, mode, slot, right). Equation `d` uses
/// `Σ_s S[s, d] C[:, :, s, :]` at every position.
pub trait SelectionSystem: BlockSparseTrain {
    fn number_of_equations(&self) -> usize;

    /// Binary (interaction(p) × number_of_equations) assignment of slots to equations
    fn selection_matrix(&self, position: usize) -> &Array2<f64>;

    /// Number of slots at `position`
    fn interaction(&self, position: usize) -> usize;
}

/// System of equations whose cores are drawn from a shared pool of trains
///
/// Equation `eq` uses component `position` of train `selection(eq, position)`.
/// All trains share one block structure and one core position.
pub trait SharedWeightSystem {
    fn order(&self) -> usize;

    fn dimensions(&self) -> &[usize];

    fn number_of_equations(&self) -> usize;

    /// Number of trains in the pool
    fn interactions(&self) -> usize;

    /// Train used by equation `eq` at `position`
    fn selection(&self, eq: usize, position: usize) -> usize;

    fn blocks(&self, position: usize) -> &[Block];

    fn component(&self, train: usize, position: usize) -> &ArrayD<f64>;

    fn set_component(&mut self, train: usize, position: usize, core: ArrayD<f64>) -> Result<()>;

    fn core_position(&self) -> usize;

    fn assume_core_position(&mut self, position: usize);

    /// Move the core of every train in the pool one step
    fn move_core(&mut self, direction: Direction) -> Result<()>;

    /// Evaluate every equation: returns (samples × number_of_equations)
    fn evaluate(&self, measurements: &[Array2<f64>]) -> Result<Array2<f64>>;

    /// Consistency self-check of the pool
    fn verify(&self) -> Result<()>;
}
