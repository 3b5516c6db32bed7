//! ALS for systems of equations coupled through a selection tensor
//!
//! Every component carries a slot axis, `(left, mode, slot, right)`, and the
//! binary selection matrix `S_p (slots, equations)` decides which slot feeds
//! which equation. The stacks keep one matrix per equation along a trailing
//! axis. Slots are fitted one at a time with a ridge term that shrinks with
//! the residual.

use scirs2_core::ndarray_ext::{s, Array1, Array2, Array3, ArrayD, Axis};

use bstt_core::{select_equation, Block, BlockSparseTensor, Direction, SelectionSystem};
use bstt_kernels::{face_splitting, leading_singular_value, ridge_solve};

use crate::config::AlsConfig;
use crate::contract::{left_data_step, predict, relative_error, right_data_step};
use crate::engine::{LocalSolver, SweepEngine, SweepReport, TerminationPolicy};
use crate::error::{AlsError, Result};
use crate::gramian::{gramian_step_left, gramian_step_right, LocalGramians};
use crate::regression::check_inputs;
use crate::stack::StackPair;

/// Stack entry of the system solver, one trailing slice per equation
#[derive(Debug, Clone)]
pub struct SystemFrame {
    /// (samples, rank, equations)
    pub data: Array3<f64>,
    /// (rank, rank, equations)
    pub h1: Array3<f64>,
    /// (rank, rank, equations)
    pub l2: Array3<f64>,
}

impl SystemFrame {
    fn seed(samples: usize, equations: usize) -> Self {
        Self {
            data: Array3::ones((samples, 1, equations)),
            h1: Array3::ones((1, 1, equations)),
            l2: Array3::ones((1, 1, equations)),
        }
    }
}

/// Ridge problem of a single slot
#[derive(Debug, Clone)]
pub struct SlotProblem {
    pub slot: usize,
    pub design: Array2<f64>,
    pub rhs: Array1<f64>,
}

/// All slot problems at the current core position
///
/// Slots used by no equation have no entry and keep their values.
#[derive(Debug, Clone)]
pub struct SystemSubproblem {
    pub slots: Vec<SlotProblem>,
}

pub struct AlsSelectionSystem<T: SelectionSystem> {
    tt: T,
    measurements: Vec<Array2<f64>>,
    values: Array2<f64>,
    gramians: LocalGramians,
    config: AlsConfig,
    stacks: StackPair<SystemFrame>,
    prev_residual: f64,
}

impl<T: SelectionSystem> AlsSelectionSystem<T> {
    pub fn new(tt: T, measurements: Vec<Array2<f64>>, values: Array2<f64>) -> Result<Self> {
        let gramians = LocalGramians::identity(tt.dimensions());
        Self::with_config(tt, measurements, values, gramians, AlsConfig::default())
    }

    /// Validate the inputs, sweep the core to position 0 and normalize it
    ///
    /// `values` has one column per equation.
    pub fn with_config(
        tt: T,
        measurements: Vec<Array2<f64>>,
        values: Array2<f64>,
        gramians: LocalGramians,
        config: AlsConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (samples, equations) = values.dim();
        check_inputs(&tt, &measurements, samples)?;
        if equations != tt.number_of_equations() {
            return Err(AlsError::ShapeMismatch(format!(
                "values have {} columns for a system of {} equations",
                equations,
                tt.number_of_equations()
            )));
        }
        if gramians.order() != tt.order() {
            return Err(AlsError::InvalidConfig(format!(
                "{} Gramians for a system of order {}",
                gramians.order(),
                tt.order()
            )));
        }

        let order = tt.order();
        let seed = SystemFrame::seed(samples, equations);
        let mut solver = Self {
            tt,
            measurements,
            values,
            gramians,
            config,
            stacks: StackPair::new(order, seed.clone(), seed),
            prev_residual: 1.0,
        };
        solver.tt.assume_core_position(order - 1);
        while solver.tt.core_position() > 0 {
            solver.update_stacks(Direction::Left)?;
        }

        let core = solver.tt.component(0);
        let norm = core.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            let scaled = core / norm;
            solver.tt.set_component(0, scaled)?;
        }
        solver.prev_residual = solver.residual()?;
        Ok(solver)
    }

    pub fn run(&mut self) -> Result<SweepReport> {
        let config = self.config.clone();
        SweepEngine::new(self, &config).run()
    }

    pub fn train(&self) -> &T {
        &self.tt
    }

    pub fn stacks(&self) -> &StackPair<SystemFrame> {
        &self.stacks
    }

    pub fn into_inner(self) -> T {
        self.tt
    }

    /// Residual of the last completed sweep, scaling the ridge term
    pub fn previous_residual(&self) -> f64 {
        self.prev_residual
    }

    /// Frame behind a component that just left the core
    fn next_frame(&self, q: usize, top: &SystemFrame, direction: Direction) -> Result<SystemFrame> {
        let component = self.tt.component(q);
        let selection = self.tt.selection_matrix(q);
        let equations = self.tt.number_of_equations();
        let meas = self.measurements[q].view();
        let (h1, l2) = (self.gramians.h1(q).view(), self.gramians.l2(q).view());

        let mut data = Vec::with_capacity(equations);
        let mut h1_stack = Vec::with_capacity(equations);
        let mut l2_stack = Vec::with_capacity(equations);
        for d in 0..equations {
            let core = select_equation(component, selection, d)?;
            let core = core.view();
            let prev_data = top.data.index_axis(Axis(2), d);
            let prev_h1 = top.h1.index_axis(Axis(2), d);
            let prev_l2 = top.l2.index_axis(Axis(2), d);
            match direction {
                Direction::Left => {
                    data.push(right_data_step(&core, &meas, &prev_data)?);
                    h1_stack.push(gramian_step_right(&core, &h1, &prev_h1)?);
                    l2_stack.push(gramian_step_right(&core, &l2, &prev_l2)?);
                }
                Direction::Right => {
                    data.push(left_data_step(&prev_data, &meas, &core)?);
                    h1_stack.push(gramian_step_left(&core, &h1, &prev_h1)?);
                    l2_stack.push(gramian_step_left(&core, &l2, &prev_l2)?);
                }
            }
        }
        Ok(SystemFrame {
            data: stack_equations(&data)?,
            h1: stack_equations(&h1_stack)?,
            l2: stack_equations(&l2_stack)?,
        })
    }

    /// Prediction of every equation at every sample, (samples, equations)
    fn prediction(&self) -> Result<Array2<f64>> {
        let p = self.tt.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let selection = self.tt.selection_matrix(p);
        let meas = self.measurements[p].view();
        let mut out = Array2::<f64>::zeros(self.values.dim());
        for d in 0..self.tt.number_of_equations() {
            let core = select_equation(self.tt.component(p), selection, d)?;
            let column = predict(
                &left.data.index_axis(Axis(2), d),
                &meas,
                &core.view(),
                &right.data.index_axis(Axis(2), d),
            )?;
            out.column_mut(d).assign(&column);
        }
        Ok(out)
    }
}

/// Stack per-equation matrices along a trailing equation axis
fn stack_equations(slices: &[Array2<f64>]) -> Result<Array3<f64>> {
    let (rows, cols) = slices
        .first()
        .map(|m| m.dim())
        .ok_or_else(|| AlsError::ShapeMismatch("system without equations".to_string()))?;
    let mut out = Array3::<f64>::zeros((rows, cols, slices.len()));
    for (d, m) in slices.iter().enumerate() {
        out.index_axis_mut(Axis(2), d).assign(m);
    }
    Ok(out)
}

impl<T: SelectionSystem> LocalSolver for AlsSelectionSystem<T> {
    type Subproblem = SystemSubproblem;

    fn name(&self) -> &'static str {
        "als-system"
    }

    fn order(&self) -> usize {
        self.tt.order()
    }

    fn core_position(&self) -> usize {
        self.tt.core_position()
    }

    /// One ridge problem per used slot
    ///
    /// Rows run over (sample, equation of the slot), columns over the
    /// `(left, mode, right)` entries of every block.
    fn build_subproblem(&self, _direction: Direction) -> Result<SystemSubproblem> {
        let p = self.tt.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let selection = self.tt.selection_matrix(p);
        let meas = self.measurements[p].view();
        let blocks = self.tt.blocks(p);
        let samples = self.values.nrows();
        let width: usize = blocks
            .iter()
            .map(|b| b.range(0).len() * b.range(1).len() * b.range(3).len())
            .sum();

        let mut slots = Vec::new();
        for k in 0..self.tt.interaction(p) {
            let eqs: Vec<usize> = (0..self.tt.number_of_equations())
                .filter(|&d| selection[[k, d]] == 1.0)
                .collect();
            if eqs.is_empty() {
                continue;
            }

            let mut design = Array2::<f64>::zeros((samples * eqs.len(), width));
            let mut rhs = Array1::<f64>::zeros(samples * eqs.len());
            for (j, &d) in eqs.iter().enumerate() {
                let l = left.data.index_axis(Axis(2), d);
                let r = right.data.index_axis(Axis(2), d);
                let mut offset = 0;
                for block in blocks {
                    let cols = face_splitting(
                        &face_splitting(
                            &l.slice(s![.., block.range(0)]),
                            &meas.slice(s![.., block.range(1)]),
                        )
                        .view(),
                        &r.slice(s![.., block.range(3)]),
                    );
                    let ncols = cols.ncols();
                    for n in 0..samples {
                        design
                            .slice_mut(s![n * eqs.len() + j, offset..offset + ncols])
                            .assign(&cols.row(n));
                    }
                    offset += ncols;
                }
                for n in 0..samples {
                    rhs[n * eqs.len() + j] = self.values[[n, d]];
                }
            }
            slots.push(SlotProblem {
                slot: k,
                design,
                rhs,
            });
        }
        Ok(SystemSubproblem { slots })
    }

    fn solve_subproblem(&mut self, subproblem: SystemSubproblem) -> Result<()> {
        let p = self.tt.core_position();
        let mut core: ArrayD<f64> = self.tt.component(p).clone();
        let shape = core.shape().to_vec();
        let reduced_shape = [shape[0], shape[1], shape[3]];
        let reduced: Vec<Block> = self
            .tt
            .blocks(p)
            .iter()
            .map(|b| b.select(&[0, 1, 3]))
            .collect();

        for problem in subproblem.slots {
            let alpha = leading_singular_value(&problem.design.view())?
                * self.config.ridge_factor
                * self.prev_residual;
            let coefficients = ridge_solve(&problem.design.view(), &problem.rhs.view(), alpha)?;
            let slab = BlockSparseTensor::to_dense(&coefficients.view(), &reduced, &reduced_shape)?;
            core.index_axis_mut(Axis(2), problem.slot).assign(&slab);
        }

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
                let frame = self.next_frame(q, self.stacks.right_top()?, direction)?;
                self.stacks.push_right(frame);
            }
            Direction::Right => {
                let q = self.tt.core_position() - 1;
                self.stacks.pop_right();
                let frame = self.next_frame(q, self.stacks.left_top()?, direction)?;
                self.stacks.push_left(frame);
            }
        }
        Ok(())
    }

    /// Relative error over all equations
    fn residual(&self) -> Result<f64> {
        let prediction = self.prediction()?;
        Ok(relative_error(prediction.iter(), self.values.iter()))
    }

    fn stacks_valid(&self) -> bool {
        self.stacks.is_valid()
    }

    fn policy(&self) -> TerminationPolicy {
        TerminationPolicy::TARGET_ONLY
    }

    fn on_sweep_end(&mut self, _sweep: usize, residual: f64) -> Result<()> {
        self.prev_residual = residual;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstt_core::{BlockSparseTTSystem, BlockSparseTrain};
    use scirs2_core::ndarray_ext::array;

    /// Two equations on two modes; slot 0 of position 0 serves both
    fn system(seed: u64) -> BlockSparseTTSystem {
        let blocks = vec![
            vec![Block::from([0..1, 0..2, 0..2, 0..2])],
            vec![Block::from([0..2, 0..2, 0..1, 0..1])],
        ];
        let selections = vec![array![[1.0, 1.0], [0.0, 0.0]], array![[1.0, 1.0]]];
        BlockSparseTTSystem::random(&[2, 2], blocks, selections, 2, seed).unwrap()
    }

    fn measurements(samples: usize) -> Vec<Array2<f64>> {
        (0..2)
            .map(|m| {
                Array2::from_shape_fn((samples, 2), |(n, j)| {
                    let x = ((n * 5 + m * 2) % 9) as f64 / 4.5 - 1.0;
                    x.powi(j as i32)
                })
            })
            .collect()
    }

    #[test]
    fn test_core_normalized_after_init() {
        let values = Array2::ones((12, 2));
        let solver = AlsSelectionSystem::new(system(3), measurements(12), values).unwrap();
        let norm: f64 = solver.train().component(0).iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
        assert_eq!(solver.stacks().right_top().unwrap().data.dim(), (12, 2, 2));
    }

    #[test]
    fn test_residual_matches_evaluate() {
        let sys = system(4);
        let meas = measurements(10);
        let values = Array2::from_shape_fn((10, 2), |(n, d)| (n + d) as f64 * 0.1);
        let solver = AlsSelectionSystem::new(sys, meas.clone(), values.clone()).unwrap();
        let full = solver.train().evaluate(&meas).unwrap();
        let expected = relative_error(full.iter(), values.iter());
        assert!((solver.residual().unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_unused_slot_keeps_values() {
        let sys = system(5);
        let values = Array2::from_shape_fn((12, 2), |(n, d)| ((n * (d + 1)) % 4) as f64);
        let mut solver = AlsSelectionSystem::new(sys, measurements(12), values).unwrap();
        let before = solver.train().component(0).index_axis(Axis(2), 1).to_owned();
        solver.microstep(Direction::Right).unwrap();
        let after = solver.train().component(0).index_axis(Axis(2), 1).to_owned();
        assert_eq!(before, after);
    }

    #[test]
    fn test_microstep_reduces_residual() {
        let sys = system(6);
        let meas = measurements(16);
        let target = system(60).evaluate(&meas).unwrap();
        let mut solver = AlsSelectionSystem::new(sys, meas, target).unwrap();
        let before = solver.residual().unwrap();
        solver.microstep(Direction::Right).unwrap();
        assert!(solver.residual().unwrap() <= before + 1e-8);
    }

    #[test]
    fn test_rejects_wrong_equation_count() {
        let values = Array2::ones((12, 3));
        assert!(AlsSelectionSystem::new(system(1), measurements(12), values).is_err());
    }
}
