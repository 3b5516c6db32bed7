//! Block-sparse train for systems of equations with a selection tensor
//!
//! Components are 4-way arrays (left, mode, slot, right). A binary selection
//! matrix `S_p` of shape (slots, equations) decides which slots feed which
//! equation, so equation `d` sees the 3-way core
//! `C_d = Σ_s S_p[s, d] C_p[:, :, s, :]`.

use std::ops::Range;

use scirs2_core::ndarray_ext::{Array1, Array2, Array3, ArrayD, ArrayViewD, Axis, Ix3, IxDyn};
use scirs2_core::random::{Rng, SeedableRng, StdRng};

use bstt_kernels::face_splitting;

use crate::block::Block;
use crate::direction::Direction;
use crate::error::{CoreError, Result};
use crate::traits::{BlockSparseTrain, SelectionSystem};
use crate::train::{matricize, TrainStorage};
use crate::tt::check_measurements;

/// Contract the slot axis of a (l, e, s, r) core against column `eq` of a selection matrix
pub fn select_equation(core: &ArrayD<f64>, selection: &Array2<f64>, eq: usize) -> Result<Array3<f64>> {
    if core.ndim() != 4 {
        return Err(CoreError::ShapeMismatch(format!(
            "system components have 4 axes, got {}",
            core.ndim()
        )));
    }
    let (l, e, slots, r) = (core.shape()[0], core.shape()[1], core.shape()[2], core.shape()[3]);
    if selection.nrows() != slots || eq >= selection.ncols() {
        return Err(CoreError::InvalidSelection(format!(
            "selection of shape {:?} does not match {} slots / equation {}",
            selection.shape(),
            slots,
            eq
        )));
    }

    let mut out = Array3::<f64>::zeros((l, e, r));
    for s in 0..slots {
        let w = selection[[s, eq]];
        if w == 0.0 {
            continue;
        }
        let slab = core
            .index_axis(Axis(2), s)
            .into_dimensionality::<Ix3>()
            .map_err(|err| CoreError::ShapeMismatch(err.to_string()))?;
        out.scaled_add(w, &slab);
    }
    Ok(out)
}

/// Block-sparse train whose slots are shared between equations via selection matrices
#[derive(Debug, Clone)]
pub struct BlockSparseTTSystem {
    storage: TrainStorage,
    selections: Vec<Array2<f64>>,
    number_of_equations: usize,
}

impl BlockSparseTTSystem {
    /// Build a system from 4-way components, blocks and per-position selections
    ///
    /// Every selection must be a 0/1 matrix of shape (slots, equations) and
    /// every block must span all slots of its component.
    pub fn new(
        components: Vec<ArrayD<f64>>,
        blocks: Vec<Vec<Block>>,
        selections: Vec<Array2<f64>>,
        number_of_equations: usize,
        core_position: usize,
    ) -> Result<Self> {
        let storage = TrainStorage::new(components, blocks, core_position, 4)?;
        let system = Self {
            storage,
            selections,
            number_of_equations,
        };
        system.validate_selections()?;
        Ok(system)
    }

    /// Random system with the given structure
    ///
    /// Slot counts come from the selection matrices, bond ranks from the
    /// blocks. Block entries are drawn uniformly from [-1, 1).
    pub fn random(
        dimensions: &[usize],
        blocks: Vec<Vec<Block>>,
        selections: Vec<Array2<f64>>,
        number_of_equations: usize,
        seed: u64,
    ) -> Result<Self> {
        let order = dimensions.len();
        if blocks.len() != order || selections.len() != order {
            return Err(CoreError::ShapeMismatch(format!(
                "{} dimensions, {} block lists, {} selections",
                order,
                blocks.len(),
                selections.len()
            )));
        }

        let mut ranks = vec![1; order + 1];
        for p in 0..order.saturating_sub(1) {
            ranks[p + 1] = blocks[p].iter().map(|b| b.right().end).max().unwrap_or(1);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut components = Vec::with_capacity(order);
        for p in 0..order {
            let shape = [ranks[p], dimensions[p], selections[p].nrows(), ranks[p + 1]];
            let mut core = ArrayD::<f64>::zeros(IxDyn(&shape));
            for block in &blocks[p] {
                if !block.fits(&shape) {
                    return Err(CoreError::InvalidBlocks {
                        position: p,
                        message: format!("block {:?} does not fit shape {:?}", block.ranges(), shape),
                    });
                }
                for idx in block.indices() {
                    core[IxDyn(&idx)] = 2.0 * rng.random::<f64>() - 1.0;
                }
            }
            components.push(core);
        }

        Self::new(components, blocks, selections, number_of_equations, 0)
    }

    fn validate_selections(&self) -> Result<()> {
        let order = self.storage.order();
        if self.number_of_equations == 0 {
            return Err(CoreError::InvalidSelection(
                "a system needs at least one equation".to_string(),
            ));
        }
        if self.selections.len() != order {
            return Err(CoreError::InvalidSelection(format!(
                "expected {} selection matrices, got {}",
                order,
                self.selections.len()
            )));
        }
        for (p, sel) in self.selections.iter().enumerate() {
            let slots = self.storage.components[p].shape()[2];
            if sel.dim() != (slots, self.number_of_equations) {
                return Err(CoreError::InvalidSelection(format!(
                    "selection {} has shape {:?}, expected ({}, {})",
                    p,
                    sel.shape(),
                    slots,
                    self.number_of_equations
                )));
            }
            if sel.iter().any(|&v| v != 0.0 && v != 1.0) {
                return Err(CoreError::InvalidSelection(format!(
                    "selection {} is not binary",
                    p
                )));
            }
            for block in &self.storage.blocks[p] {
                if block.range(2) != (0..slots) {
                    return Err(CoreError::InvalidBlocks {
                        position: p,
                        message: format!(
                            "block {:?} must span all {} slots",
                            block.ranges(),
                            slots
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl BlockSparseTrain for BlockSparseTTSystem {
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
        let samples = check_measurements(&self.storage.dimensions, measurements)?;
        let mut out = Array2::<f64>::zeros((samples, self.number_of_equations));
        for eq in 0..self.number_of_equations {
            let mut acc = Array2::<f64>::ones((samples, 1));
            for (p, meas) in measurements.iter().enumerate() {
                let core = select_equation(&self.storage.components[p], &self.selections[p], eq)?;
                let (l, e, r) = core.dim();
                let mat = matricize(&core.into_dyn(), l * e, r)?;
                acc = face_splitting(&acc.view(), &meas.view()).dot(&mat);
            }
            out.column_mut(eq).assign(&acc.column(0));
        }
        Ok(out)
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

impl SelectionSystem for BlockSparseTTSystem {
    fn number_of_equations(&self) -> usize {
        self.number_of_equations
    }

    fn selection_matrix(&self, position: usize) -> &Array2<f64> {
        &self.selections[position]
    }

    fn interaction(&self, position: usize) -> usize {
        self.storage.components[position].shape()[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray_ext::array;

    fn two_site_system() -> BlockSparseTTSystem {
        let blocks = vec![
            vec![Block::from([0..1, 0..2, 0..2, 0..2])],
            vec![Block::from([0..2, 0..2, 0..1, 0..1])],
        ];
        let selections = vec![array![[1.0, 0.0], [0.0, 1.0]], array![[1.0, 1.0]]];
        BlockSparseTTSystem::random(&[2, 2], blocks, selections, 2, 17).unwrap()
    }

    #[test]
    fn test_select_equation_picks_slot() {
        let sys = two_site_system();
        let c0 = select_equation(sys.component(0), sys.selection_matrix(0), 1).unwrap();
        for i in 0..2 {
            for k in 0..2 {
                assert_eq!(c0[[0, i, k]], sys.component(0)[IxDyn(&[0, i, 1, k])]);
            }
        }
    }

    #[test]
    fn test_select_equation_sums_selected_slots() {
        let core = ArrayD::from_shape_vec(IxDyn(&[1, 2, 3, 1]), vec![1.0, 2.0, 4.0, -1.0, 0.5, 3.0])
            .unwrap();
        let selection = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

        let c0 = select_equation(&core, &selection, 0).unwrap();
        assert_eq!(c0.dim(), (1, 2, 1));
        assert_eq!(c0[[0, 0, 0]], 5.0);
        assert_eq!(c0[[0, 1, 0]], 2.0);

        let c1 = select_equation(&core, &selection, 1).unwrap();
        assert_eq!(c1[[0, 0, 0]], 6.0);
        assert_eq!(c1[[0, 1, 0]], 3.5);
        assert!(select_equation(&core, &selection, 2).is_err());
    }

    #[test]
    fn test_evaluate_preserved_by_moves() {
        let mut sys = two_site_system();
        let meas = vec![
            array![[1.0, 0.5], [0.2, -1.0], [0.0, 1.0]],
            array![[1.0, 2.0], [0.3, 0.3], [-1.0, 0.5]],
        ];
        let before = sys.evaluate(&meas).unwrap();
        assert_eq!(before.shape(), &[3, 2]);

        sys.move_core(Direction::Right).unwrap();
        let after = sys.evaluate(&meas).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_rejects_non_binary_selection() {
        let blocks = vec![vec![Block::from([0..1, 0..2, 0..1, 0..1])]];
        let comps = vec![ArrayD::<f64>::zeros(IxDyn(&[1, 2, 1, 1]))];
        let err = BlockSparseTTSystem::new(comps, blocks, vec![array![[0.5]]], 1, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelection(_)));
    }

    #[test]
    fn test_rejects_partial_slot_range() {
        let blocks = vec![vec![Block::from([0..1, 0..2, 0..1, 0..1])]];
        let comps = vec![ArrayD::<f64>::zeros(IxDyn(&[1, 2, 2, 1]))];
        let err = BlockSparseTTSystem::new(comps, blocks, vec![array![[1.0], [0.0]]], 1, 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidBlocks { .. }));
    }
}
