//! Block-sparse tensor train with 3-way components
//!
//! Components have layout (left rank, mode, right rank). Evaluation on
//! per-sample measurements contracts the train from the left:
//!
//! ```text
//! acc_0 = ones(N, 1)
//! acc_{p+1} = (acc_p • E_p) · C_p.reshape(l*e, r)
//! ```
//!
//! where `•` is the face-splitting product.

use std::ops::Range;

use scirs2_core::ndarray_ext::{Array1, Array2, Array3, ArrayD, ArrayViewD, IxDyn};
use scirs2_core::random::{Rng, SeedableRng, StdRng};

use bstt_kernels::face_splitting;

use crate::block::Block;
use crate::direction::Direction;
use crate::error::{CoreError, Result};
use crate::traits::BlockSparseTrain;
use crate::train::{matricize, TrainStorage};

/// Block-sparse tensor train with a movable orthogonality center
#[derive(Debug, Clone)]
pub struct BlockSparseTT {
    storage: TrainStorage,
}

impl BlockSparseTT {
    /// Build a train from components and their blocks
    ///
    /// Fails if shapes disagree across bonds, blocks leave their component,
    /// overlap, or do not partition every bond into common slices, or if a
    /// component has non-zero entries outside its blocks.
    pub fn new(
        components: Vec<Array3<f64>>,
        blocks: Vec<Vec<Block>>,
        core_position: usize,
    ) -> Result<Self> {
        let components = components.into_iter().map(|c| c.into_dyn()).collect();
        Ok(Self {
            storage: TrainStorage::new(components, blocks, core_position, 3)?,
        })
    }

    /// Random train with the given dimensions and block structure
    ///
    /// Bond ranks are the largest right index used by the blocks of each
    /// component. Block entries are drawn uniformly from [-1, 1).
    pub fn random(dimensions: &[usize], blocks: Vec<Vec<Block>>, seed: u64) -> Result<Self> {
        let order = dimensions.len();
        if blocks.len() != order {
            return Err(CoreError::ShapeMismatch(format!(
                "{} dimensions but {} block lists",
                order,
                blocks.len()
            )));
        }

        let mut ranks = vec![1; order + 1];
        for p in 0..order.saturating_sub(1) {
            ranks[p + 1] = blocks[p].iter().map(|b| b.right().end).max().unwrap_or(1);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut components = Vec::with_capacity(order);
        for p in 0..order {
            let mut core = Array3::<f64>::zeros((ranks[p], dimensions[p], ranks[p + 1]));
            for block in &blocks[p] {
                if !block.fits(core.shape()) {
                    return Err(CoreError::InvalidBlocks {
                        position: p,
                        message: format!(
                            "block {:?} does not fit shape {:?}",
                            block.ranges(),
                            core.shape()
                        ),
                    });
                }
                for idx in block.indices() {
                    core[[idx[0], idx[1], idx[2]]] = 2.0 * rng.random::<f64>() - 1.0;
                }
            }
            components.push(core);
        }

        Self::new(components, blocks, 0)
    }

    /// Rank of every bond, including the trivial outer bonds
    pub fn ranks(&self) -> Vec<usize> {
        let mut ranks = vec![1];
        ranks.extend(self.storage.components.iter().map(|c| c.shape()[2]));
        ranks
    }

    /// Total number of free parameters
    pub fn dofs(&self) -> usize {
        self.storage
            .blocks
            .iter()
            .flat_map(|bs| bs.iter().map(Block::size))
            .sum()
    }

    /// Dense full tensor, for small trains only
    pub fn to_full(&self) -> Result<ArrayD<f64>> {
        let mut acc = Array2::<f64>::ones((1, 1));
        for core in &self.storage.components {
            let (l, e, r) = (core.shape()[0], core.shape()[1], core.shape()[2]);
            let mat = matricize(core, l, e * r)?;
            let rows = acc.nrows();
            acc = acc
                .dot(&mat)
                .into_shape_with_order((rows * e, r))
                .map_err(|err| CoreError::ShapeMismatch(err.to_string()))?;
        }
        acc.into_shape_with_order(IxDyn(&self.storage.dimensions))
            .map_err(|err| CoreError::ShapeMismatch(err.to_string()))
    }

    pub(crate) fn check_measurements(&self, measurements: &[Array2<f64>]) -> Result<usize> {
        check_measurements(&self.storage.dimensions, measurements)
    }
}

/// Validate per-mode measurements and return the sample count
pub(crate) fn check_measurements(dimensions: &[usize], measurements: &[Array2<f64>]) -> Result<usize> {
    if measurements.len() != dimensions.len() {
        return Err(CoreError::ShapeMismatch(format!(
            "expected {} measurement matrices, got {}",
            dimensions.len(),
            measurements.len()
        )));
    }
    let samples = measurements.first().map_or(0, |m| m.nrows());
    for (p, (meas, &dim)) in measurements.iter().zip(dimensions).enumerate() {
        if meas.dim() != (samples, dim) {
            return Err(CoreError::ShapeMismatch(format!(
                "measurements of mode {} have shape {:?}, expected ({}, {})",
                p,
                meas.shape(),
                samples,
                dim
            )));
        }
    }
    Ok(samples)
}

impl BlockSparseTrain for BlockSparseTT {
    fn order(&self) -> usize {
        self.storage.order()
    }

    fn dimensions(&self) -> &[usize] {
        &self.storage.dimensions
    }

    fn component(&self, position: usize) -> &ArrayD<f64> {
        &self.storage.components[position]
    }

    fn set_component(&mut self, position: usize, core: ArrayD<f64>) -> Result<()> {
        self.storage.set_component(position, core)
    }

    fn blocks(&self, position: usize) -> &[Block] {
        &self.storage.blocks[position]
    }

    fn core_position(&self) -> usize {
        self.storage.core_position
    }

    fn assume_core_position(&mut self, position: usize) {
        self.storage.core_position = position;
    }

    fn move_core(&mut self, direction: Direction) -> Result<Array1<f64>> {
        self.storage.move_core(direction)
    }

    fn evaluate(&self, measurements: &[Array2<f64>]) -> Result<Array2<f64>> {
        let samples = self.check_measurements(measurements)?;
        let mut acc = Array2::<f64>::ones((samples, 1));
        for (core, meas) in self.storage.components.iter().zip(measurements) {
            let (l, e, r) = (core.shape()[0], core.shape()[1], core.shape()[2]);
            let mat = matricize(core, l * e, r)?;
            acc = face_splitting(&acc.view(), &meas.view()).dot(&mat);
        }
        Ok(acc)
    }

    fn unique_slices(&self, axis: usize) -> Vec<Range<usize>> {
        self.storage
            .unique_ranges(self.storage.core_position, axis)
    }

    fn blocks_of_slice(&self, position: usize, slice: &Range<usize>, axis: usize) -> Vec<Block> {
        self.storage.blocks_of_slice(position, slice, axis)
    }

    fn max_size(&self, slice_index: usize, position: usize, cap: usize) -> usize {
        self.storage.max_size(slice_index, position, cap)
    }

    fn increase_block(
        &mut self,
        slice_index: usize,
        vector: ArrayViewD<f64>,
        padding: ArrayViewD<f64>,
        direction: Direction,
    ) -> Result<()> {
        self.storage
            .increase_block(slice_index, vector, padding, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray_ext::{Array, Axis};

    /// Degree-limited structure: slice `k` of every bond holds total degree `k`
    fn degree_blocks(order: usize, dim: usize) -> Vec<Vec<Block>> {
        let max_deg = dim - 1;
        (0..order)
            .map(|p| {
                let mut blocks = Vec::new();
                let left_degs = if p == 0 { 0 } else { max_deg };
                for l in 0..=left_degs {
                    for e in 0..dim {
                        let r = l + e;
                        if r > max_deg {
                            continue;
                        }
                        if p == order - 1 && r != max_deg {
                            continue;
                        }
                        let right = if p == order - 1 { 0..1 } else { r..r + 1 };
                        blocks.push(Block::from([l..l + 1, e..e + 1, right]));
                    }
                }
                blocks
            })
            .collect()
    }

    #[test]
    fn test_random_respects_blocks() {
        let tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 7).unwrap();
        assert_eq!(tt.ranks(), vec![1, 3, 3, 1]);
        for p in 0..3 {
            let mask = crate::block::block_mask(tt.blocks(p), tt.component(p).shape());
            for (v, m) in tt.component(p).iter().zip(mask.iter()) {
                if !m {
                    assert_eq!(*v, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_move_core_preserves_full_tensor() {
        let mut tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 11).unwrap();
        let before = tt.to_full().unwrap();

        tt.move_core(Direction::Right).unwrap();
        tt.move_core(Direction::Right).unwrap();
        assert_eq!(tt.core_position(), 2);
        tt.move_core(Direction::Left).unwrap();
        assert_eq!(tt.core_position(), 1);

        let after = tt.to_full().unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_move_right_left_orthonormalizes() {
        let mut tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 3).unwrap();
        tt.move_core(Direction::Right).unwrap();

        let core = tt.component(0);
        let (l, e, r) = (core.shape()[0], core.shape()[1], core.shape()[2]);
        let mat = core.to_shape((l * e, r)).unwrap().to_owned();
        let gram = mat.t().dot(&mat);
        for i in 0..r {
            for j in 0..r {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_move_out_of_range() {
        let mut tt = BlockSparseTT::random(&[2, 2], degree_blocks(2, 2), 1).unwrap();
        assert!(matches!(
            tt.move_core(Direction::Left),
            Err(CoreError::CoreOutOfRange { .. })
        ));
    }

    #[test]
    fn test_evaluate_matches_full_tensor() {
        let tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 5).unwrap();
        let full = tt.to_full().unwrap();

        // Unit-vector measurements pick single entries of the full tensor
        let picks = [[0, 1, 2], [2, 0, 0], [1, 1, 0]];
        let meas: Vec<Array2<f64>> = (0..3)
            .map(|mode| {
                Array::from_shape_fn((3, 3), |(n, j)| if picks[n][mode] == j { 1.0 } else { 0.0 })
            })
            .collect();
        let values = tt.evaluate(&meas).unwrap();
        assert_eq!(values.len_of(Axis(1)), 1);
        for (n, pick) in picks.iter().enumerate() {
            assert!((values[[n, 0]] - full[IxDyn(pick)]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rejects_mismatched_slices() {
        let comps = vec![Array3::<f64>::zeros((1, 2, 2)), Array3::<f64>::zeros((2, 2, 1))];
        let blocks = vec![
            vec![Block::from([0..1, 0..2, 0..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..2, 0..1])],
        ];
        let err = BlockSparseTT::new(comps, blocks, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidBlocks { .. }));
    }

    #[test]
    fn test_increase_block_shifts_later_slices() {
        let mut tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 9).unwrap();
        tt.move_core(Direction::Right).unwrap();
        assert_eq!(tt.unique_slices(0), vec![0..1, 1..2, 2..3]);

        let vector = ArrayD::<f64>::zeros(IxDyn(&[1, 3]));
        let padding = ArrayD::<f64>::zeros(IxDyn(&[3, 3]));
        tt.increase_block(1, vector.view(), padding.view(), Direction::Left)
            .unwrap();

        assert_eq!(tt.ranks(), vec![1, 4, 3, 1]);
        assert_eq!(tt.unique_slices(0), vec![0..1, 1..3, 3..4]);
        assert_eq!(
            tt.storage.bond_slices(0),
            vec![0..1, 1..3, 3..4],
            "both sides of the bond agree"
        );
    }
}
