//! Pool of block-sparse trains shared between the equations of a system
//!
//! Equation `eq` evaluates component `p` of train `selection[eq, p]`. All
//! trains in the pool carry the same block structure and move their cores
//! together, each orthogonalizing its own components.

use scirs2_core::ndarray_ext::{Array2, ArrayD};

use bstt_kernels::face_splitting;

use crate::block::Block;
use crate::direction::Direction;
use crate::error::{CoreError, Result};
use crate::traits::{BlockSparseTrain, SharedWeightSystem};
use crate::train::matricize;
use crate::tt::{check_measurements, BlockSparseTT};

/// Weight-sharing system over a pool of [`BlockSparseTT`]s
#[derive(Debug, Clone)]
pub struct BlockSparseTTSystem2 {
    trains: Vec<BlockSparseTT>,
    selection: Array2<usize>,
}

impl BlockSparseTTSystem2 {
    /// Build the pool; `selection` has shape (equations, order)
    pub fn new(trains: Vec<BlockSparseTT>, selection: Array2<usize>) -> Result<Self> {
        let system = Self { trains, selection };
        system.verify()?;
        Ok(system)
    }

    pub fn trains(&self) -> &[BlockSparseTT] {
        &self.trains
    }

    pub fn train(&self, k: usize) -> &BlockSparseTT {
        &self.trains[k]
    }

    pub fn selection_matrix(&self) -> &Array2<usize> {
        &self.selection
    }

    pub fn into_trains(self) -> Vec<BlockSparseTT> {
        self.trains
    }
}

impl SharedWeightSystem for BlockSparseTTSystem2 {
    fn order(&self) -> usize {
        self.trains[0].order()
    }

    fn dimensions(&self) -> &[usize] {
        self.trains[0].dimensions()
    }

    fn number_of_equations(&self) -> usize {
        self.selection.nrows()
    }

    fn interactions(&self) -> usize {
        self.trains.len()
    }

    fn selection(&self, eq: usize, position: usize) -> usize {
        self.selection[[eq, position]]
    }

    fn blocks(&self, position: usize) -> &[Block] {
        self.trains[0].blocks(position)
    }

    fn component(&self, train: usize, position: usize) -> &ArrayD<f64> {
        self.trains[train].component(position)
    }

    fn set_component(&mut self, train: usize, position: usize, core: ArrayD<f64>) -> Result<()> {
        let count = self.trains.len();
        self.trains
            .get_mut(train)
            .ok_or_else(|| {
                CoreError::InvalidSelection(format!(
                    "train {} requested from a pool of {}",
                    train, count
                ))
            })?
            .set_component(position, core)
    }

    fn core_position(&self) -> usize {
        self.trains[0].core_position()
    }

    fn assume_core_position(&mut self, position: usize) {
        for train in &mut self.trains {
            train.assume_core_position(position);
        }
    }

    fn move_core(&mut self, direction: Direction) -> Result<()> {
        for train in &mut self.trains {
            train.move_core(direction)?;
        }
        Ok(())
    }

    fn evaluate(&self, measurements: &[Array2<f64>]) -> Result<Array2<f64>> {
        let samples = check_measurements(self.dimensions(), measurements)?;
        let equations = self.number_of_equations();
        let mut out = Array2::<f64>::zeros((samples, equations));
        for eq in 0..equations {
            let mut acc = Array2::<f64>::ones((samples, 1));
            for (p, meas) in measurements.iter().enumerate() {
                let core = self.component(self.selection(eq, p), p);
                let (l, e, r) = (core.shape()[0], core.shape()[1], core.shape()[2]);
                let mat = matricize(core, l * e, r)?;
                acc = face_splitting(&acc.view(), &meas.view()).dot(&mat);
            }
            out.column_mut(eq).assign(&acc.column(0));
        }
        Ok(out)
    }

    fn verify(&self) -> Result<()> {
        let first = self.trains.first().ok_or_else(|| {
            CoreError::Inconsistent("the pool holds no trains".to_string())
        })?;
        let order = first.order();

        for (k, train) in self.trains.iter().enumerate().skip(1) {
            if train.order() != order || train.dimensions() != first.dimensions() {
                return Err(CoreError::Inconsistent(format!(
                    "train {} has order {} and dimensions {:?}, train 0 has {} and {:?}",
                    k,
                    train.order(),
                    train.dimensions(),
                    order,
                    first.dimensions()
                )));
            }
            if train.core_position() != first.core_position() {
                return Err(CoreError::Inconsistent(format!(
                    "train {} has core position {}, train 0 has {}",
                    k,
                    train.core_position(),
                    first.core_position()
                )));
            }
            for p in 0..order {
                if train.blocks(p) != first.blocks(p)
                    || train.component(p).shape() != first.component(p).shape()
                {
                    return Err(CoreError::Inconsistent(format!(
                        "train {} differs from train 0 in structure at component {}",
                        k, p
                    )));
                }
            }
        }

        if self.selection.nrows() == 0 || self.selection.ncols() != order {
            return Err(CoreError::InvalidSelection(format!(
                "selection has shape {:?}, expected (equations, {})",
                self.selection.shape(),
                order
            )));
        }
        if let Some(&bad) = self.selection.iter().find(|&&k| k >= self.trains.len()) {
            return Err(CoreError::InvalidSelection(format!(
                "selection references train {} in a pool of {}",
                bad,
                self.trains.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray_ext::array;

    fn blocks() -> Vec<Vec<Block>> {
        vec![
            vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..1, 1..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..2, 0..1])],
        ]
    }

    fn pool() -> BlockSparseTTSystem2 {
        let trains = vec![
            BlockSparseTT::random(&[2, 2, 2], blocks(), 1).unwrap(),
            BlockSparseTT::random(&[2, 2, 2], blocks(), 2).unwrap(),
        ];
        BlockSparseTTSystem2::new(trains, array![[0, 0, 1], [1, 0, 0]]).unwrap()
    }

    #[test]
    fn test_evaluate_uses_selected_trains() {
        let sys = pool();
        let meas = vec![
            array![[1.0, 0.0], [0.0, 1.0]],
            array![[0.0, 1.0], [1.0, 0.0]],
            array![[1.0, 1.0], [0.5, -0.5]],
        ];
        let values = sys.evaluate(&meas).unwrap();
        assert_eq!(values.shape(), &[2, 2]);

        // Equation 0 equals train 0 on the first two modes and train 1 on the last
        let mixed = BlockSparseTT::new(
            vec![
                sys.component(0, 0).clone().into_dimensionality().unwrap(),
                sys.component(0, 1).clone().into_dimensionality().unwrap(),
                sys.component(1, 2).clone().into_dimensionality().unwrap(),
            ],
            blocks(),
            0,
        )
        .unwrap();
        let expected = mixed.evaluate(&meas).unwrap();
        for n in 0..2 {
            assert!((values[[n, 0]] - expected[[n, 0]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_move_core_moves_every_train() {
        let mut sys = pool();
        sys.move_core(Direction::Right).unwrap();
        assert_eq!(sys.core_position(), 1);
        assert!(sys.trains().iter().all(|t| t.core_position() == 1));
        sys.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_unknown_train() {
        let trains = vec![BlockSparseTT::random(&[2, 2, 2], blocks(), 1).unwrap()];
        let err = BlockSparseTTSystem2::new(trains, array![[0, 1, 0]]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelection(_)));
    }

    #[test]
    fn test_verify_rejects_diverging_positions() {
        let mut sys = pool();
        sys.trains[1].assume_core_position(2);
        assert!(matches!(sys.verify(), Err(CoreError::Inconsistent(_))));
    }
}
