//! Learning a scalar function from samples of its gradient
//!
//! Column `k` of `values` holds the `k`-th partial derivative at every
//! sample. Replacing the measurements of mode `k` by the derivatives of its
//! basis functions turns the train into a model of that partial derivative,
//! so the objective is
//!
//! ```text
//! Σ_{k < order-1} ‖train(E_0, .., E'_k, .., E_{d-1}) - values[:, k]‖²
//! ```
//!
//! It is quadratic in the current core. The microstep assembles its normal
//! equations from two levels of stacks: level 1 contracts plain
//! measurements only, level 2 collects every term with exactly one
//! derivative on that side of the core.

use scirs2_core::ndarray_ext::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};

use bstt_core::{BlockSparseTensor, BlockSparseTrain, Direction};
use bstt_kernels::{
    contract_mode, sample_congruence_left, sample_congruence_right, sample_project_left,
    sample_project_right, sample_triple_product, sample_triple_vector, solve_or_lstsq,
};

use crate::config::AlsConfig;
use crate::contract::as_core3;
use crate::engine::{LocalSolver, SweepEngine, SweepReport, TerminationPolicy};
use crate::error::{AlsError, Result};
use crate::regression::check_inputs;
use crate::stack::StackPair;

/// Stack entry of the gradient solver
///
/// Gram stacks have layout (rank, sample, rank), right-hand side stacks
/// (rank, sample).
#[derive(Debug, Clone)]
pub struct GradientFrame {
    pub stack1: Array3<f64>,
    pub stack2: Array3<f64>,
    pub rhs1: Array2<f64>,
    pub rhs2: Array2<f64>,
}

impl GradientFrame {
    fn seed(samples: usize) -> Self {
        Self {
            stack1: Array3::ones((1, samples, 1)),
            stack2: Array3::ones((1, samples, 1)),
            rhs1: Array2::ones((1, samples)),
            rhs2: Array2::ones((1, samples)),
        }
    }
}

/// Square normal equations of one microstep
#[derive(Debug, Clone)]
pub struct GradientSubproblem {
    pub operator: Array2<f64>,
    pub rhs: Array1<f64>,
}

/// ALS fitting a train to gradient samples
pub struct AlsGradient<T: BlockSparseTrain> {
    tt: T,
    measurements: Vec<Array2<f64>>,
    gradient_measurements: Vec<Array2<f64>>,
    values: Array2<f64>,
    config: AlsConfig,
    stacks: StackPair<GradientFrame>,
}

impl<T: BlockSparseTrain> AlsGradient<T> {
    pub fn new(
        tt: T,
        measurements: Vec<Array2<f64>>,
        gradient_measurements: Vec<Array2<f64>>,
        values: Array2<f64>,
    ) -> Result<Self> {
        Self::with_config(tt, measurements, gradient_measurements, values, AlsConfig::default())
    }

    /// Validate the inputs and sweep the core to position 0
    ///
    /// `gradient_measurements` has `order` or `order - 1` entries, `values`
    /// one column per derivative, at least `order - 1`.
    pub fn with_config(
        tt: T,
        measurements: Vec<Array2<f64>>,
        gradient_measurements: Vec<Array2<f64>>,
        values: Array2<f64>,
        config: AlsConfig,
    ) -> Result<Self> {
        config.validate()?;
        let samples = values.nrows();
        check_inputs(&tt, &measurements, samples)?;

        let order = tt.order();
        if gradient_measurements.len() != order && gradient_measurements.len() + 1 != order {
            return Err(AlsError::ShapeMismatch(format!(
                "{} gradient measurement matrices for a train of order {}",
                gradient_measurements.len(),
                order
            )));
        }
        for (mode, meas) in gradient_measurements.iter().enumerate() {
            if meas.dim() != (samples, tt.dimensions()[mode]) {
                return Err(AlsError::ShapeMismatch(format!(
                    "gradient measurements of mode {} have shape {:?}, expected ({}, {})",
                    mode,
                    meas.shape(),
                    samples,
                    tt.dimensions()[mode]
                )));
            }
        }
        if values.ncols() + 1 < order {
            return Err(AlsError::ShapeMismatch(format!(
                "values hold {} derivatives, need at least {}",
                values.ncols(),
                order - 1
            )));
        }

        let mut solver = Self {
            tt,
            measurements,
            gradient_measurements,
            values,
            config,
            stacks: StackPair::new(order, GradientFrame::seed(samples), GradientFrame::seed(samples)),
        };
        solver.tt.assume_core_position(order - 1);
        while solver.tt.core_position() > 0 {
            solver.update_stacks(Direction::Left)?;
        }
        Ok(solver)
    }

    pub fn run(&mut self) -> Result<SweepReport> {
        let config = self.config.clone();
        SweepEngine::new(self, &config).run()
    }

    pub fn train(&self) -> &T {
        &self.tt
    }

    pub fn stacks(&self) -> &StackPair<GradientFrame> {
        &self.stacks
    }

    pub fn into_inner(self) -> T {
        self.tt
    }

    fn derivative_weights(&self, mode: usize) -> ArrayView1<'_, f64> {
        self.values.column(mode)
    }

    /// Right frame for component `q`, which just left the core
    fn right_frame(&self, q: usize, right: &GradientFrame) -> Result<GradientFrame> {
        let order = self.tt.order();
        let core = as_core3(self.tt.component(q))?;
        let cm = contract_mode(&core, &self.measurements[q].view());
        let cmv = cm.view();

        if q == order - 1 {
            return Ok(GradientFrame {
                stack1: sample_congruence_right(&right.stack1.view(), &cmv, &cmv),
                stack2: sample_congruence_right(&right.stack2.view(), &cmv, &cmv),
                rhs1: sample_project_right(&right.rhs1.view(), &cmv, None),
                rhs2: sample_project_right(&right.rhs2.view(), &cmv, None),
            });
        }

        let cmg = contract_mode(&core, &self.gradient_measurements[q].view());
        let cmgv = cmg.view();
        let weights = self.derivative_weights(q);
        let mut stack2 = sample_congruence_right(&right.stack1.view(), &cmgv, &cmgv);
        let mut rhs2 = sample_project_right(&right.rhs1.view(), &cmgv, Some(&weights));
        if q + 2 < order {
            stack2 += &sample_congruence_right(&right.stack2.view(), &cmv, &cmv);
            rhs2 += &sample_project_right(&right.rhs2.view(), &cmv, None);
        }

        Ok(GradientFrame {
            stack1: sample_congruence_right(&right.stack1.view(), &cmv, &cmv),
            stack2,
            rhs1: sample_project_right(&right.rhs1.view(), &cmv, None),
            rhs2,
        })
    }

    /// Left frame for component `q`, which just left the core
    fn left_frame(&self, q: usize, left: &GradientFrame) -> Result<GradientFrame> {
        let core = as_core3(self.tt.component(q))?;
        let cm = contract_mode(&core, &self.measurements[q].view());
        let cmg = contract_mode(&core, &self.gradient_measurements[q].view());
        let (cmv, cmgv) = (cm.view(), cmg.view());
        let weights = self.derivative_weights(q);

        let mut stack2 = sample_congruence_left(&left.stack1.view(), &cmgv, &cmgv);
        let mut rhs2 = sample_project_left(&left.rhs1.view(), &cmgv, Some(&weights));
        if q > 0 {
            stack2 += &sample_congruence_left(&left.stack2.view(), &cmv, &cmv);
            rhs2 += &sample_project_left(&left.rhs2.view(), &cmv, None);
        }

        Ok(GradientFrame {
            stack1: sample_congruence_left(&left.stack1.view(), &cmv, &cmv),
            stack2,
            rhs1: sample_project_left(&left.rhs1.view(), &cmv, None),
            rhs2,
        })
    }
}

/// Per-sample outer product `op[p, m, q] = E[m, p] E[m, q]`
fn sample_outer(measurements: &ArrayView2<f64>) -> Array3<f64> {
    let (samples, dim) = measurements.dim();
    Array3::from_shape_fn((dim, samples, dim), |(p, m, q)| {
        measurements[[m, p]] * measurements[[m, q]]
    })
}

fn pair_slice<'a>(
    stack: &'a Array3<f64>,
    rows: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
) -> ArrayView3<'a, f64> {
    stack.slice(s![rows, .., cols])
}

impl<T: BlockSparseTrain> LocalSolver for AlsGradient<T> {
    type Subproblem = GradientSubproblem;

    fn name(&self) -> &'static str {
        "als-grad"
    }

    fn order(&self) -> usize {
        self.tt.order()
    }

    fn core_position(&self) -> usize {
        self.tt.core_position()
    }

    fn build_subproblem(&self, _direction: Direction) -> Result<GradientSubproblem> {
        let p = self.tt.core_position();
        let order = self.tt.order();
        let interior = p + 2 < order;
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let e = self.measurements[p].view();
        let eg = self.gradient_measurements[p].view();
        let e_op = sample_outer(&e);
        let eg_op = sample_outer(&eg);
        let weights = self.derivative_weights(p);

        let blocks = self.tt.blocks(p);
        let dofs = BlockSparseTensor::dofs(blocks);
        let mut operator = Array2::<f64>::zeros((dofs, dofs));
        let mut rhs = Array1::<f64>::zeros(dofs);

        let mut row = 0;
        for b1 in blocks {
            let size1 = b1.size();
            let mut col = 0;
            for b2 in blocks {
                let size2 = b2.size();
                let ev = pair_slice(&e_op, b1.range(1), b2.range(1));
                let mut op = sample_triple_product(
                    &pair_slice(&left.stack2, b1.range(0), b2.range(0)),
                    &ev,
                    &pair_slice(&right.stack1, b1.range(2), b2.range(2)),
                );
                if interior {
                    op += &sample_triple_product(
                        &pair_slice(&left.stack1, b1.range(0), b2.range(0)),
                        &ev,
                        &pair_slice(&right.stack2, b1.range(2), b2.range(2)),
                    );
                }
                op += &sample_triple_product(
                    &pair_slice(&left.stack1, b1.range(0), b2.range(0)),
                    &pair_slice(&eg_op, b1.range(1), b2.range(1)),
                    &pair_slice(&right.stack1, b1.range(2), b2.range(2)),
                );
                operator
                    .slice_mut(s![row..row + size1, col..col + size2])
                    .assign(&op);
                col += size2;
            }

            let l2 = left.rhs2.slice(s![b1.range(0), ..]);
            let l1 = left.rhs1.slice(s![b1.range(0), ..]);
            let r1 = right.rhs1.slice(s![b1.range(2), ..]);
            let r2 = right.rhs2.slice(s![b1.range(2), ..]);
            let eb = e.slice(s![.., b1.range(1)]);
            let mut block_rhs = sample_triple_vector(&l2, &eb, &r1, None);
            if interior {
                block_rhs += &sample_triple_vector(&l1, &eb, &r2, None);
            }
            block_rhs += &sample_triple_vector(
                &l1,
                &eg.slice(s![.., b1.range(1)]),
                &r1,
                Some(&weights),
            );
            rhs.slice_mut(s![row..row + size1]).assign(&block_rhs);
            row += size1;
        }

        Ok(GradientSubproblem { operator, rhs })
    }

    fn solve_subproblem(&mut self, subproblem: GradientSubproblem) -> Result<()> {
        let coefficients = solve_or_lstsq(&subproblem.operator.view(), &subproblem.rhs.view())?;
        let p = self.tt.core_position();
        let shape = self.tt.component(p).shape().to_vec();
        let core = BlockSparseTensor::to_dense(&coefficients.view(), self.tt.blocks(p), &shape)?;
        self.tt.set_component(p, core)?;
        Ok(())
    }

    fn update_stacks(&mut self, direction: Direction) -> Result<()> {
        assert!(
            self.stacks.check_len(self.tt.order()),
            "stack length invariant violated"
        );
        self.tt.move_core(direction)?;
        match direction {
            Direction::Left => {
                let q = self.tt.core_position() + 1;
                self.stacks.pop_left();
                let frame = self.right_frame(q, self.stacks.right_top()?)?;
                self.stacks.push_right(frame);
            }
            Direction::Right => {
                let q = self.tt.core_position() - 1;
                self.stacks.pop_right();
                let frame = self.left_frame(q, self.stacks.left_top()?)?;
                self.stacks.push_left(frame);
            }
        }
        Ok(())
    }

    /// Relative error over the first `order - 1` derivatives
    fn residual(&self) -> Result<f64> {
        let order = self.tt.order();
        let mut error = 0.0;
        for k in 0..order - 1 {
            let mut meas = self.measurements.clone();
            meas[k] = self.gradient_measurements[k].clone();
            let prediction = self.tt.evaluate(&meas)?;
            error += prediction
                .column(0)
                .iter()
                .zip(self.values.column(k).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>();
        }
        let norm = self.values.iter().map(|v| v * v).sum::<f64>().sqrt();
        Ok(if norm > 0.0 { error.sqrt() / norm } else { error.sqrt() })
    }

    fn stacks_valid(&self) -> bool {
        self.stacks.is_valid()
    }

    fn policy(&self) -> TerminationPolicy {
        TerminationPolicy::STRICT
    }

    fn right_sweep_end(&self) -> usize {
        self.tt.order().saturating_sub(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstt_core::{Block, BlockSparseTT};

    /// Three modes of dimension 2 with degree-limited blocks
    fn train(seed: u64) -> BlockSparseTT {
        let blocks = vec![
            vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
            vec![
                Block::from([0..1, 0..1, 0..1]),
                Block::from([0..1, 1..2, 1..2]),
                Block::from([1..2, 0..1, 1..2]),
            ],
            vec![Block::from([0..1, 1..2, 0..1]), Block::from([1..2, 0..1, 0..1])],
        ];
        BlockSparseTT::random(&[2, 2, 2], blocks, seed).unwrap()
    }

    fn monomials(samples: usize) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let points: Vec<[f64; 3]> = (0..samples)
            .map(|n| {
                let t = n as f64;
                [(t * 0.37).sin(), (t * 0.71).cos(), (t * 0.13 + 0.5).sin()]
            })
            .collect();
        let meas = (0..3)
            .map(|m| Array2::from_shape_fn((samples, 2), |(n, j)| points[n][m].powi(j as i32)))
            .collect();
        let grad = (0..3)
            .map(|_| Array2::from_shape_fn((samples, 2), |(_, j)| if j == 1 { 1.0 } else { 0.0 }))
            .collect();
        (meas, grad)
    }

    #[test]
    fn test_construction_and_stack_shapes() {
        let (meas, grad) = monomials(10);
        let values = Array2::ones((10, 2));
        let solver = AlsGradient::new(train(1), meas, grad, values).unwrap();
        assert_eq!(solver.core_position(), 0);
        assert!(solver.stacks().is_valid());
        let top = solver.stacks().right_top().unwrap();
        assert_eq!(top.stack1.dim(), (2, 10, 2));
        assert_eq!(top.rhs2.dim(), (2, 10));
    }

    #[test]
    fn test_rejects_short_values() {
        let (meas, grad) = monomials(10);
        let values = Array2::ones((10, 1));
        assert!(AlsGradient::new(train(1), meas, grad, values).is_err());
    }

    #[test]
    fn test_sweep_does_not_increase_residual() {
        // f = x0 + x1 + x2 has gradient (1, 1, 1)
        let (meas, grad) = monomials(16);
        let values = Array2::ones((16, 3));
        let mut solver = AlsGradient::new(train(2), meas, grad, values).unwrap();
        let before = solver.residual().unwrap();
        let config = AlsConfig::default().with_max_sweeps(2);
        let report = SweepEngine::new(&mut solver, &config).run().unwrap();
        assert!(report.final_residual <= before + 1e-10);
        assert_eq!(solver.core_position(), 0);
    }
}
