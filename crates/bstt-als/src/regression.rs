//! Scalar regression on a block-sparse tensor train
//!
//! Fits `values[n] ≈ train(measurements[.][n, :])` by alternating least
//! squares. Each microstep solves for the free entries of the current core,
//! either by minimum-norm least squares ([`Method::L2`]) or by a
//! cross-validated lasso in coordinates whitened by the H1 Gramians
//! ([`Method::L1`]).
//!
//! With rank adaptation enabled, every right move may grow the slices of the
//! bond behind the new core by one index. The new direction lies in the
//! allowed rows of the slice, orthogonal to the slice's current columns, and
//! minimizes the H1 Gramian restricted to those directions.

use scirs2_core::ndarray_ext::{s, Array1, Array2, ArrayD, IxDyn};

use bstt_core::{BlockSparseTensor, BlockSparseTrain, Direction};
use bstt_kernels::{
    block_diag, is_identity, is_orthonormal_columns, is_orthonormal_rows, kronecker, lstsq_min_norm,
    null_space, round_decimals, sym_eigh, LassoCv,
};

use crate::config::{AlsConfig, Method};
use crate::contract::{
    as_core3, design_block, design_matrix, left_data_step, predict, relative_error,
    right_data_step, unfold_left,
};
use crate::engine::{LocalSolver, SweepEngine, SweepReport, TerminationPolicy};
use crate::error::{AlsError, Result};
use crate::gramian::{gramian_step_left, gramian_step_right, LocalGramians};
use crate::stack::StackPair;

/// Stack entry of the regression solver
#[derive(Debug, Clone)]
pub struct RegressionFrame {
    /// Contraction with the measurements, one row per sample
    pub data: Array2<f64>,
    pub h1: Array2<f64>,
    pub l2: Array2<f64>,
}

impl RegressionFrame {
    fn seed(samples: usize) -> Self {
        Self {
            data: Array2::ones((samples, 1)),
            h1: Array2::ones((1, 1)),
            l2: Array2::ones((1, 1)),
        }
    }
}

/// Local system of one microstep
#[derive(Debug, Clone)]
pub enum RegressionSubproblem {
    LeastSquares {
        design: Array2<f64>,
    },
    /// Design already multiplied by `transform · diag(1 / weights)`
    Whitened {
        design: Array2<f64>,
        transform: Array2<f64>,
        weights: Array1<f64>,
    },
}

/// ALS for a scalar block-sparse tensor train
pub struct AlsRegression<T: BlockSparseTrain> {
    tt: T,
    measurements: Vec<Array2<f64>>,
    values: Array1<f64>,
    gramians: LocalGramians,
    config: AlsConfig,
    stacks: StackPair<RegressionFrame>,
    /// Rank increases happen on right moves while set
    increasing: bool,
    smin: f64,
}

impl<T: BlockSparseTrain> AlsRegression<T> {
    /// Solver with identity Gramians and the default configuration
    pub fn new(tt: T, measurements: Vec<Array2<f64>>, values: Array1<f64>) -> Result<Self> {
        let gramians = LocalGramians::identity(tt.dimensions());
        Self::with_config(tt, measurements, values, gramians, AlsConfig::default())
    }

    /// Validate the inputs and sweep the core to position 0, building the right stacks
    pub fn with_config(
        tt: T,
        measurements: Vec<Array2<f64>>,
        values: Array1<f64>,
        gramians: LocalGramians,
        config: AlsConfig,
    ) -> Result<Self> {
        config.validate()?;
        check_inputs(&tt, &measurements, values.len())?;
        if gramians.order() != tt.order() {
            return Err(AlsError::InvalidConfig(format!(
                "{} Gramians for a train of order {}",
                gramians.order(),
                tt.order()
            )));
        }
        for mode in 0..tt.order() {
            let d = tt.dimensions()[mode];
            if gramians.l2(mode).dim() != (d, d) || gramians.h1(mode).dim() != (d, d) {
                return Err(AlsError::InvalidGramian {
                    mode,
                    message: format!("expected ({}, {})", d, d),
                });
            }
        }

        let samples = values.len();
        let order = tt.order();
        let mut solver = Self {
            tt,
            measurements,
            values,
            gramians,
            stacks: StackPair::new(order, RegressionFrame::seed(samples), RegressionFrame::seed(samples)),
            config,
            increasing: false,
            smin: 0.0,
        };

        solver.tt.assume_core_position(order - 1);
        while solver.tt.core_position() > 0 {
            solver.update_stacks(Direction::Left)?;
        }
        Ok(solver)
    }

    /// Run sweeps until a termination check fires
    pub fn run(&mut self) -> Result<SweepReport> {
        let config = self.config.clone();
        SweepEngine::new(self, &config).run()
    }

    pub fn config(&self) -> &AlsConfig {
        &self.config
    }

    pub fn train(&self) -> &T {
        &self.tt
    }

    pub fn stacks(&self) -> &StackPair<RegressionFrame> {
        &self.stacks
    }

    pub fn into_inner(self) -> T {
        self.tt
    }

    /// Current rank increase threshold
    pub fn smin(&self) -> f64 {
        self.smin
    }

    fn least_squares_subproblem(&self) -> Result<RegressionSubproblem> {
        let p = self.tt.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let design = design_matrix(
            &left.data.view(),
            &self.measurements[p].view(),
            &right.data.view(),
            self.tt.blocks(p),
        );
        Ok(RegressionSubproblem::LeastSquares { design })
    }

    fn whitened_subproblem(&self) -> Result<RegressionSubproblem> {
        let p = self.tt.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let mode_h1 = self.gramians.h1(p);

        assert!(
            is_identity(&left.l2.view(), 1e-12),
            "left L2 Gramian stack is not the identity at position {}",
            p
        );

        let blocks = self.tt.blocks(p);
        let samples = self.values.len();
        let dofs = BlockSparseTensor::dofs(blocks);
        let mut design = Array2::<f64>::zeros((samples, dofs));
        let mut transforms = Vec::with_capacity(blocks.len());
        let mut weights = Vec::with_capacity(dofs);
        let mut offset = 0;

        for block in blocks {
            let (bl, be, br) = (block.range(0), block.range(1), block.range(2));
            let cols = design_block(
                &left.data.view(),
                &self.measurements[p].view(),
                &right.data.view(),
                block,
            );
            design
                .slice_mut(s![.., offset..offset + cols.ncols()])
                .assign(&cols);
            offset += cols.ncols();

            let (le, lp) = sym_eigh(&left.h1.slice(s![bl.clone(), bl]))?;
            let (ee, ep) = sym_eigh(&mode_h1.slice(s![be.clone(), be]))?;
            let (mut re, rp) = sym_eigh(&right.h1.slice(s![br.clone(), br.clone()]))?;

            // Rescale right eigenvalues by the L2 norm of each right eigenvector
            let rp_l2 = rp.t().dot(&right.l2.slice(s![br.clone(), br])).dot(&rp);
            for (k, v) in re.iter_mut().enumerate() {
                *v /= rp_l2[[k, k]];
            }

            transforms.push(kronecker(&kronecker(&lp.view(), &ep.view()).view(), &rp.view()));
            for &a in le.iter() {
                for &b in ee.iter() {
                    for &c in re.iter() {
                        weights.push((a * b * c).max(f64::MIN_POSITIVE).sqrt());
                    }
                }
            }
        }

        let transform = block_diag(&transforms);
        assert!(
            is_orthonormal_rows(&transform.view(), 1e-12),
            "whitening transform is not orthonormal at position {}",
            p
        );

        let weights = Array1::from(weights);
        let mut whitened = design.dot(&transform);
        for (mut col, w) in whitened.columns_mut().into_iter().zip(weights.iter()) {
            col.mapv_inplace(|v| v / w);
        }

        Ok(RegressionSubproblem::Whitened {
            design: whitened,
            transform,
            weights,
        })
    }

    fn write_core(&mut self, coefficients: &Array1<f64>) -> Result<()> {
        let p = self.tt.core_position();
        let shape = self.tt.component(p).shape().to_vec();
        let core = BlockSparseTensor::to_dense(&coefficients.view(), self.tt.blocks(p), &shape)?;
        self.tt.set_component(p, core)?;
        Ok(())
    }

    /// Grow the slices of the bond behind the core after a right move
    fn increase_ranks(&mut self, singular_values: &Array1<f64>) -> Result<()> {
        let p = self.tt.core_position();
        let bond = p - 1;
        let cap = self.config.max_group_size.cap(bond);
        let slices = self.tt.unique_slices(0);

        for (i, slice) in slices.iter().enumerate().rev() {
            let smallest = singular_values
                .slice(s![slice.clone()])
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            let max_size = self.tt.max_size(i, bond, cap);
            if !(smallest > self.smin && slice.len() < max_size) {
                continue;
            }

            assert!(
                self.behind_core_orthonormal()?,
                "component {} is not left-orthonormal before a rank increase",
                bond
            );
            let update = self.calculate_update(slice)?;
            let padding_shape = self.tt.component(p).shape()[1..3].to_vec();
            let padding = ArrayD::<f64>::zeros(IxDyn(&padding_shape));
            self.tt
                .increase_block(i, update.view(), padding.view(), Direction::Left)?;
            assert!(
                self.behind_core_orthonormal()?,
                "component {} is not left-orthonormal after a rank increase",
                bond
            );

            tracing::debug!(
                slice = i,
                component = bond,
                before = slice.len(),
                after = slice.len() + 1,
                max_size,
                "increased block"
            );
        }
        Ok(())
    }

    fn behind_core_orthonormal(&self) -> Result<bool> {
        let p = self.tt.core_position();
        let core = as_core3(self.tt.component(p - 1))?;
        let unfolded = unfold_left(&core)?;
        Ok(is_orthonormal_columns(&unfolded.view(), 1e-12))
    }

    /// New left basis vector for `slice` of the bond behind the core
    fn calculate_update(&self, slice: &std::ops::Range<usize>) -> Result<ArrayD<f64>> {
        let p = self.tt.core_position();
        let behind = p - 1;
        let left_h1 = &self.stacks.left_top()?.h1;
        let gramian = kronecker(&left_h1.view(), &self.gramians.h1(behind).view());

        let core = as_core3(self.tt.component(behind))?;
        let (l, e, _) = core.dim();
        let n = l * e;

        // Unit vectors outside the slice's blocks plus the slice's current columns
        let mut basis = Array2::<f64>::zeros((n, n + slice.len()));
        for i in 0..n {
            basis[[i, i]] = 1.0;
        }
        for block in self.tt.blocks_of_slice(behind, slice, 2) {
            for a in block.range(0) {
                for b in block.range(1) {
                    let idx = a * e + b;
                    basis[[idx, idx]] = 0.0;
                }
            }
        }
        let unfolded = unfold_left(&core)?;
        basis
            .slice_mut(s![.., n..])
            .assign(&unfolded.slice(s![.., slice.clone()]));

        let mut ns = null_space(&basis.t())?;
        assert!(
            ns.ncols() > 0,
            "no admissible direction left to grow slice {:?} of component {}",
            slice,
            behind
        );
        round_decimals(&mut ns, 14);

        let projected = ns.t().dot(&gramian).dot(&ns);
        let (_, vectors) = sym_eigh(&projected.view())?;
        let direction = ns.dot(&vectors.column(0));
        direction
            .into_shape_with_order(IxDyn(&[l, e]))
            .map_err(|err| AlsError::ShapeMismatch(err.to_string()))
    }
}

/// Check measurement count and shapes against the train
pub(crate) fn check_inputs<T: BlockSparseTrain + ?Sized>(
    tt: &T,
    measurements: &[Array2<f64>],
    samples: usize,
) -> Result<()> {
    if tt.order() < 2 {
        return Err(AlsError::InvalidConfig(format!(
            "trains need at least two components, got {}",
            tt.order()
        )));
    }
    if measurements.len() != tt.order() {
        return Err(AlsError::ShapeMismatch(format!(
            "{} measurement matrices for a train of order {}",
            measurements.len(),
            tt.order()
        )));
    }
    for (mode, (meas, &dim)) in measurements.iter().zip(tt.dimensions()).enumerate() {
        if meas.dim() != (samples, dim) {
            return Err(AlsError::ShapeMismatch(format!(
                "measurements of mode {} have shape {:?}, expected ({}, {})",
                mode,
                meas.shape(),
                samples,
                dim
            )));
        }
    }
    Ok(())
}

impl<T: BlockSparseTrain> LocalSolver for AlsRegression<T> {
    type Subproblem = RegressionSubproblem;

    fn name(&self) -> &'static str {
        "als"
    }

    fn order(&self) -> usize {
        self.tt.order()
    }

    fn core_position(&self) -> usize {
        self.tt.core_position()
    }

    fn build_subproblem(&self, _direction: Direction) -> Result<RegressionSubproblem> {
        match self.config.method {
            Method::L2 => self.least_squares_subproblem(),
            Method::L1 => self.whitened_subproblem(),
        }
    }

    fn solve_subproblem(&mut self, subproblem: RegressionSubproblem) -> Result<()> {
        let coefficients = match subproblem {
            RegressionSubproblem::LeastSquares { design } => {
                lstsq_min_norm(&design.view(), &self.values.view())?
            }
            RegressionSubproblem::Whitened {
                design,
                transform,
                weights,
            } => {
                let fit = LassoCv::new(self.config.lasso.clone())
                    .fit(&design.view(), &self.values.view())?;
                transform.dot(&(&fit.coefficients / &weights))
            }
        };
        self.write_core(&coefficients)
    }

    fn update_stacks(&mut self, direction: Direction) -> Result<()> {
        let order = self.tt.order();
        assert!(
            self.stacks.check_len(order),
            "stack length invariant violated"
        );

        match direction {
            Direction::Left => {
                self.tt.move_core(Direction::Left)?;
                let q = self.tt.core_position() + 1;
                self.stacks.pop_left();

                let core = as_core3(self.tt.component(q))?;
                let right = self.stacks.right_top()?;
                let frame = RegressionFrame {
                    data: right_data_step(&core, &self.measurements[q].view(), &right.data.view())?,
                    h1: gramian_step_right(&core, &self.gramians.h1(q).view(), &right.h1.view())?,
                    l2: gramian_step_right(&core, &self.gramians.l2(q).view(), &right.l2.view())?,
                };
                self.stacks.push_right(frame);
            }
            Direction::Right => {
                let singular_values = self.tt.move_core(Direction::Right)?;
                if self.increasing {
                    self.increase_ranks(&singular_values)?;
                }
                let q = self.tt.core_position() - 1;
                self.stacks.pop_right();

                let core = as_core3(self.tt.component(q))?;
                let left = self.stacks.left_top()?;
                let frame = RegressionFrame {
                    data: left_data_step(&left.data.view(), &self.measurements[q].view(), &core)?,
                    h1: gramian_step_left(&core, &self.gramians.h1(q).view(), &left.h1.view())?,
                    l2: gramian_step_left(&core, &self.gramians.l2(q).view(), &left.l2.view())?,
                };
                self.stacks.push_left(frame);
            }
        }
        Ok(())
    }

    fn residual(&self) -> Result<f64> {
        let p = self.tt.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let core = as_core3(self.tt.component(p))?;
        let prediction = predict(
            &left.data.view(),
            &self.measurements[p].view(),
            &core,
            &right.data.view(),
        )?;
        Ok(relative_error(prediction.iter(), self.values.iter()))
    }

    fn stacks_valid(&self) -> bool {
        self.stacks.is_valid()
    }

    fn policy(&self) -> TerminationPolicy {
        TerminationPolicy::STRICT
    }

    fn on_sweep_start(&mut self, sweep: usize) -> Result<()> {
        if sweep == 0 {
            self.smin = self.residual()? * self.config.smin_factor;
        }
        if self.config.increase_ranks && sweep >= self.config.initial_sweeps {
            self.increasing = true;
        }
        Ok(())
    }

    fn on_sweep_end(&mut self, _sweep: usize, residual: f64) -> Result<()> {
        self.smin = residual * self.config.smin_factor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstt_core::{Block, BlockSparseTT};

    /// Two modes of dimension 2, both bonds split into single-index slices
    fn small_train(seed: u64) -> BlockSparseTT {
        let blocks = vec![
            vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..2, 0..1])],
        ];
        BlockSparseTT::random(&[2, 2], blocks, seed).unwrap()
    }

    fn measurements(samples: usize) -> Vec<Array2<f64>> {
        (0..2)
            .map(|m| {
                Array2::from_shape_fn((samples, 2), |(n, j)| {
                    let x = ((n * 5 + m * 3) % 7) as f64 / 3.5 - 1.0;
                    x.powi(j as i32)
                })
            })
            .collect()
    }

    #[test]
    fn test_construction_builds_right_stacks() {
        let solver =
            AlsRegression::new(small_train(1), measurements(8), Array1::ones(8)).unwrap();
        assert_eq!(solver.core_position(), 0);
        assert!(solver.stacks().is_valid());
        assert_eq!(solver.stacks().left_len(), 1);
        assert_eq!(solver.stacks().right_len(), 2);
        assert!(solver.residual().unwrap() >= 0.0);
    }

    #[test]
    fn test_rejects_bad_measurements() {
        let mut meas = measurements(8);
        meas[1] = Array2::zeros((7, 2));
        assert!(matches!(
            AlsRegression::new(small_train(1), meas, Array1::ones(8)),
            Err(AlsError::ShapeMismatch(_))
        ));
        assert!(AlsRegression::new(small_train(1), measurements(8), Array1::ones(6)).is_err());
    }

    #[test]
    fn test_l2_microstep_matches_lstsq() {
        let config = AlsConfig::default().with_method(Method::L2);
        let values = Array1::from_shape_fn(8, |n| (n as f64 * 0.4).sin());
        let gramians = LocalGramians::identity(&[2, 2]);
        let mut solver =
            AlsRegression::with_config(small_train(3), measurements(8), values.clone(), gramians, config)
                .unwrap();

        let RegressionSubproblem::LeastSquares { design } =
            solver.build_subproblem(Direction::Right).unwrap()
        else {
            panic!("l2 builds a least-squares subproblem");
        };
        let expected = lstsq_min_norm(&design.view(), &values.view()).unwrap();

        solver.microstep(Direction::Right).unwrap();
        let core = solver.train().component(0);
        let got = BlockSparseTensor::coefficients(&core.view(), solver.train().blocks(0)).unwrap();
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_l1_transform_is_identity_for_identity_gramians() {
        let solver =
            AlsRegression::new(small_train(4), measurements(12), Array1::ones(12)).unwrap();
        let RegressionSubproblem::Whitened {
            transform, weights, ..
        } = solver.build_subproblem(Direction::Right).unwrap()
        else {
            panic!("l1 builds a whitened subproblem");
        };
        assert!(is_orthonormal_rows(&transform.view(), 1e-12));
        assert!(weights.iter().all(|w| (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_l1_microstep_keeps_block_sparsity() {
        let values = Array1::from_shape_fn(12, |n| 1.0 + 0.1 * n as f64);
        let mut solver = AlsRegression::new(small_train(5), measurements(12), values).unwrap();
        solver.microstep(Direction::Right).unwrap();
        let mask = bstt_core::block_mask(solver.train().blocks(0), solver.train().component(0).shape());
        for (v, m) in solver.train().component(0).iter().zip(mask.iter()) {
            assert!(*m || *v == 0.0);
        }
    }
}
