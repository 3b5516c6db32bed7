//! ALS for systems of equations sharing weights through a pool of trains
//!
//! Equation `eq` evaluates component `p` of train `selection(eq, p)`. At each
//! position every train of the pool is refitted against the equations that
//! use it there. When a train takes over equations from a neighbouring
//! position, a small change of basis on the bond is fitted for each switched
//! equation and folded into both the neighbouring component and the stack
//! entry of that equation.

use scirs2_core::ndarray_ext::{s, Array1, Array2, IxDyn};

use bstt_core::{Block, BlockSparseTensor, Direction, SharedWeightSystem};
use bstt_kernels::{face_splitting, lstsq_min_norm};

use crate::config::AlsConfig;
use crate::contract::{
    as_core3, design_matrix, left_data_step, predict, relative_error, right_data_step,
    unfold_left, unfold_right,
};
use crate::engine::{LocalSolver, SweepEngine, SweepReport, TerminationPolicy};
use crate::error::{AlsError, Result};
use crate::stack::StackPair;

/// Default relative decrease below which a shared system run stalls
pub const SHARED_MIN_DECREASE: f64 = 1e-3;

/// Local design matrices of every equation plus the half-sweep direction
#[derive(Debug, Clone)]
pub struct SharedSubproblem {
    pub direction: Direction,
    /// One (samples, dofs) design per equation
    pub operators: Vec<Array2<f64>>,
}

/// How a train is refitted at the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    /// Joint least squares over the equations using it here
    Direct,
    /// Fit for the equations using it behind the core, re-basis the switched ones
    CarryBehind,
    /// Fit for the equations using it ahead of the core, re-basis the switched ones
    CarryAhead,
}

pub struct AlsSharedSystem<T: SharedWeightSystem> {
    system: T,
    measurements: Vec<Array2<f64>>,
    values: Array2<f64>,
    config: AlsConfig,
    stacks: StackPair<Vec<Array2<f64>>>,
}

impl<T: SharedWeightSystem> AlsSharedSystem<T> {
    /// Solver with the default configuration and a stall threshold of
    /// [`SHARED_MIN_DECREASE`]
    pub fn new(system: T, measurements: Vec<Array2<f64>>, values: Array2<f64>) -> Result<Self> {
        let config = AlsConfig::default().with_min_decrease(SHARED_MIN_DECREASE);
        Self::with_config(system, measurements, values, config)
    }

    pub fn with_config(
        system: T,
        measurements: Vec<Array2<f64>>,
        values: Array2<f64>,
        config: AlsConfig,
    ) -> Result<Self> {
        config.validate()?;
        system.verify()?;
        let order = system.order();
        let (samples, equations) = values.dim();
        if order < 2 {
            return Err(AlsError::ShapeMismatch(format!(
                "systems need at least two modes, got {}",
                order
            )));
        }
        if measurements.len() != order {
            return Err(AlsError::ShapeMismatch(format!(
                "{} measurement matrices for a system of order {}",
                measurements.len(),
                order
            )));
        }
        for (mode, (meas, &dim)) in measurements.iter().zip(system.dimensions()).enumerate() {
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
        if equations != system.number_of_equations() {
            return Err(AlsError::ShapeMismatch(format!(
                "values have {} columns for a system of {} equations",
                equations,
                system.number_of_equations()
            )));
        }

        let seed = vec![Array2::<f64>::ones((samples, 1)); equations];
        let mut solver = Self {
            system,
            measurements,
            values,
            config,
            stacks: StackPair::new(order, seed.clone(), seed),
        };
        solver.system.assume_core_position(order - 1);
        while solver.system.core_position() > 0 {
            solver.update_stacks(Direction::Left)?;
        }
        Ok(solver)
    }

    pub fn run(&mut self) -> Result<SweepReport> {
        let config = self.config.clone();
        SweepEngine::new(self, &config).run()
    }

    pub fn system(&self) -> &T {
        &self.system
    }

    pub fn stacks(&self) -> &StackPair<Vec<Array2<f64>>> {
        &self.stacks
    }

    pub fn into_inner(self) -> T {
        self.system
    }

    /// Update case of train `k`; `None` leaves the train untouched
    fn classify(&self, k: usize, users: usize, direction: Direction) -> Option<Update> {
        let p = self.system.core_position();
        let last_train = self.system.interactions() - 1;
        let last_position = self.system.order() - 1;
        let direct = users == 1
            || (direction == Direction::Right && k == last_train && p > 0)
            || (direction == Direction::Left && k == 0 && p < last_position);
        if direct {
            Some(Update::Direct)
        } else if (direction == Direction::Right && k == 0)
            || (direction == Direction::Left && k == 0 && p == last_position)
        {
            Some(Update::CarryBehind)
        } else if (direction == Direction::Left && k == last_train)
            || (direction == Direction::Right && k == last_train && p == 0)
        {
            Some(Update::CarryAhead)
        } else {
            None
        }
    }

    /// Equations whose train at `position` is `k`
    fn users(&self, k: usize, position: usize) -> Vec<bool> {
        (0..self.system.number_of_equations())
            .map(|eq| self.system.selection(eq, position) == k)
            .collect()
    }

    /// Joint least squares over the equations in `eqs`, written into train `k`
    fn fit_train(&mut self, k: usize, eqs: &[bool], operators: &[Array2<f64>]) -> Result<()> {
        let p = self.system.core_position();
        let samples = self.values.nrows();
        let chosen: Vec<usize> = (0..eqs.len()).filter(|&eq| eqs[eq]).collect();
        if chosen.is_empty() {
            return Ok(());
        }
        let dofs = operators[chosen[0]].ncols();
        let mut design = Array2::<f64>::zeros((samples * chosen.len(), dofs));
        let mut rhs = Array1::<f64>::zeros(samples * chosen.len());
        for (j, &eq) in chosen.iter().enumerate() {
            design
                .slice_mut(s![j * samples..(j + 1) * samples, ..])
                .assign(&operators[eq]);
            rhs.slice_mut(s![j * samples..(j + 1) * samples])
                .assign(&self.values.column(eq));
        }
        let coefficients = lstsq_min_norm(&design.view(), &rhs.view())?;
        let shape = self.system.component(k, p).shape().to_vec();
        let core = BlockSparseTensor::to_dense(&coefficients.view(), self.system.blocks(p), &shape)?;
        self.system.set_component(k, p, core)?;
        Ok(())
    }

    /// Block-diagonal bond transform fitted to one equation
    ///
    /// `outer` and `inner` are the per-sample factors on either side of the
    /// bond; the transform acts on the ranges in `bond_blocks`.
    fn fit_bond_transform(
        &self,
        eq: usize,
        outer: &Array2<f64>,
        inner: &Array2<f64>,
        bond_blocks: &[Block],
        rank: usize,
    ) -> Result<Array2<f64>> {
        let columns: Vec<Array2<f64>> = bond_blocks
            .iter()
            .map(|b| {
                face_splitting(
                    &outer.slice(s![.., b.range(0)]),
                    &inner.slice(s![.., b.range(1)]),
                )
            })
            .collect();
        let width: usize = columns.iter().map(|c| c.ncols()).sum();
        let mut design = Array2::<f64>::zeros((self.values.nrows(), width));
        let mut offset = 0;
        for c in &columns {
            design
                .slice_mut(s![.., offset..offset + c.ncols()])
                .assign(c);
            offset += c.ncols();
        }
        let coefficients = lstsq_min_norm(&design.view(), &self.values.column(eq))?;
        let dense = BlockSparseTensor::to_dense(&coefficients.view(), bond_blocks, &[rank, rank])?;
        dense
            .into_dimensionality()
            .map_err(|e| AlsError::ShapeMismatch(e.to_string()))
    }

    /// Equations whose assignment to `k` differs between here and the
    /// neighbour, or every equation if none differs
    fn switched(here: &[bool], there: &[bool]) -> Vec<usize> {
        let differing: Vec<usize> = (0..here.len()).filter(|&i| here[i] != there[i]).collect();
        if differing.is_empty() {
            (0..here.len()).collect()
        } else {
            differing
        }
    }

    /// Train `k` takes over from the component behind the core
    fn carry_behind(&mut self, k: usize, here: &[bool], operators: &[Array2<f64>]) -> Result<()> {
        let p = self.system.core_position();
        let order = self.system.order();
        let prev = if p == 0 { order - 1 } else { p - 1 };
        let there = self.users(k, prev);
        self.fit_train(k, &there, operators)?;

        let bond_blocks = dedup(self.system.blocks(p).iter().map(|b| {
            let r = b.range(0);
            Block::from([r.clone(), r])
        }));
        let core = self.system.component(k, p).clone();
        let core = as_core3(&core)?;
        let rank = core.dim().0;
        let meas = self.measurements[p].view();

        for eq in Self::switched(here, &there) {
            let right = self.stacks.right_top()?[eq].clone();
            let right_new = right_data_step(&core, &meas, &right.view())?;
            let left = self.stacks.left_top()?[eq].clone();
            let transform = self.fit_bond_transform(eq, &left, &right_new, &bond_blocks, rank)?;

            self.stacks.left_top_mut()?[eq] = left.dot(&transform);

            let owner = self.system.selection(eq, prev);
            let neighbour = self.system.component(owner, prev);
            let (l, e, _) = as_core3(neighbour)?.dim();
            let updated = unfold_left(&as_core3(neighbour)?)?.dot(&transform);
            let r = updated.ncols();
            let updated = updated
                .into_shape_with_order(IxDyn(&[l, e, r]))
                .map_err(|e| AlsError::ShapeMismatch(e.to_string()))?;
            self.system.set_component(owner, prev, updated)?;
        }
        Ok(())
    }

    /// Train `k` hands over to the component ahead of the core
    fn carry_ahead(&mut self, k: usize, here: &[bool], operators: &[Array2<f64>]) -> Result<()> {
        let p = self.system.core_position();
        let next = p + 1;
        if next >= self.system.order() {
            return Err(AlsError::InvalidSelection(format!(
                "train {} hands over past the last position {}",
                k, p
            )));
        }
        let there = self.users(k, next);
        self.fit_train(k, &there, operators)?;

        let bond_blocks = dedup(self.system.blocks(p).iter().map(|b| {
            let r = b.range(2);
            Block::from([r.clone(), r])
        }));
        let core = self.system.component(k, p).clone();
        let core = as_core3(&core)?;
        let rank = core.dim().2;
        let meas = self.measurements[p].view();

        for eq in Self::switched(here, &there) {
            let left = self.stacks.left_top()?[eq].clone();
            let left_new = left_data_step(&left.view(), &meas, &core)?;
            let right = self.stacks.right_top()?[eq].clone();
            let transform = self.fit_bond_transform(eq, &left_new, &right, &bond_blocks, rank)?;

            self.stacks.right_top_mut()?[eq] = right.dot(&transform.t());

            let owner = self.system.selection(eq, next);
            let neighbour = self.system.component(owner, next);
            let (_, e, r) = as_core3(neighbour)?.dim();
            let updated = transform.dot(&unfold_right(&as_core3(neighbour)?)?);
            let l = updated.nrows();
            let updated = updated
                .into_shape_with_order(IxDyn(&[l, e, r]))
                .map_err(|e| AlsError::ShapeMismatch(e.to_string()))?;
            self.system.set_component(owner, next, updated)?;
        }
        Ok(())
    }

    /// Predictions of every equation from the stacks, (samples, equations)
    fn prediction(&self) -> Result<Array2<f64>> {
        let p = self.system.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let meas = self.measurements[p].view();
        let mut out = Array2::<f64>::zeros(self.values.dim());
        for eq in 0..self.system.number_of_equations() {
            let core = as_core3(self.system.component(self.system.selection(eq, p), p))?;
            let column = predict(&left[eq].view(), &meas, &core, &right[eq].view())?;
            out.column_mut(eq).assign(&column);
        }
        Ok(out)
    }
}

/// Keep the first occurrence of every block
fn dedup(blocks: impl Iterator<Item = Block>) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::new();
    for block in blocks {
        if !out.contains(&block) {
            out.push(block);
        }
    }
    out
}

impl<T: SharedWeightSystem> LocalSolver for AlsSharedSystem<T> {
    type Subproblem = SharedSubproblem;

    fn name(&self) -> &'static str {
        "als-shared"
    }

    fn order(&self) -> usize {
        self.system.order()
    }

    fn core_position(&self) -> usize {
        self.system.core_position()
    }

    fn build_subproblem(&self, direction: Direction) -> Result<SharedSubproblem> {
        let p = self.system.core_position();
        let left = self.stacks.left_top()?;
        let right = self.stacks.right_top()?;
        let meas = self.measurements[p].view();
        let blocks = self.system.blocks(p);
        let operators = (0..self.system.number_of_equations())
            .map(|eq| design_matrix(&left[eq].view(), &meas, &right[eq].view(), blocks))
            .collect();
        Ok(SharedSubproblem {
            direction,
            operators,
        })
    }

    fn solve_subproblem(&mut self, subproblem: SharedSubproblem) -> Result<()> {
        let p = self.system.core_position();
        for k in 0..self.system.interactions() {
            let here = self.users(k, p);
            let count = here.iter().filter(|&&u| u).count();
            if count == 0 {
                continue;
            }
            let Some(update) = self.classify(k, count, subproblem.direction) else {
                continue;
            };
            tracing::trace!(train = k, position = p, ?update, "shared update");
            match update {
                Update::Direct => self.fit_train(k, &here, &subproblem.operators)?,
                Update::CarryBehind => self.carry_behind(k, &here, &subproblem.operators)?,
                Update::CarryAhead => self.carry_ahead(k, &here, &subproblem.operators)?,
            }
        }
        self.system.verify()?;
        Ok(())
    }

    fn update_stacks(&mut self, direction: Direction) -> Result<()> {
        assert!(
            self.stacks.check_len(self.system.order()),
            "stack length invariant violated"
        );
        self.system.move_core(direction)?;
        let equations = self.system.number_of_equations();
        match direction {
            Direction::Left => {
                let q = self.system.core_position() + 1;
                self.stacks.pop_left();
                let top = self.stacks.right_top()?;
                let mut frame = Vec::with_capacity(equations);
                for (eq, right) in top.iter().enumerate() {
                    let core = as_core3(self.system.component(self.system.selection(eq, q), q))?;
                    frame.push(right_data_step(&core, &self.measurements[q].view(), &right.view())?);
                }
                self.stacks.push_right(frame);
            }
            Direction::Right => {
                let q = self.system.core_position() - 1;
                self.stacks.pop_right();
                let top = self.stacks.left_top()?;
                let mut frame = Vec::with_capacity(equations);
                for (eq, left) in top.iter().enumerate() {
                    let core = as_core3(self.system.component(self.system.selection(eq, q), q))?;
                    frame.push(left_data_step(&left.view(), &self.measurements[q].view(), &core)?);
                }
                self.stacks.push_left(frame);
            }
        }
        Ok(())
    }

    fn residual(&self) -> Result<f64> {
        let prediction = self.prediction()?;
        Ok(relative_error(prediction.iter(), self.values.iter()))
    }

    fn stacks_valid(&self) -> bool {
        self.stacks.is_valid()
    }

    fn policy(&self) -> TerminationPolicy {
        TerminationPolicy::WARM_START
    }

    fn terminal_microstep(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstt_core::{BlockSparseTT, BlockSparseTTSystem2};
    use scirs2_core::ndarray_ext::array;

    fn blocks() -> Vec<Vec<Block>> {
        vec![
            vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..2, 1..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..1, 1..2])],
            vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..2, 0..1])],
        ]
    }

    fn pool(selection: Array2<usize>, seed: u64) -> BlockSparseTTSystem2 {
        let trains = (0..2)
            .map(|k| BlockSparseTT::random(&[2, 2, 2], blocks(), seed + k).unwrap())
            .collect();
        BlockSparseTTSystem2::new(trains, selection).unwrap()
    }

    fn measurements(samples: usize) -> Vec<Array2<f64>> {
        (0..3)
            .map(|m| {
                Array2::from_shape_fn((samples, 2), |(n, j)| {
                    let x = ((n * 3 + m * 5) % 13) as f64 / 6.5 - 1.0;
                    x.powi(j as i32)
                })
            })
            .collect()
    }

    #[test]
    fn test_switched_equations() {
        type Solver = AlsSharedSystem<BlockSparseTTSystem2>;
        assert_eq!(Solver::switched(&[true, false], &[true, true]), vec![1]);
        assert_eq!(Solver::switched(&[true, false], &[true, false]), vec![0, 1]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let blocks = dedup(
            [
                Block::from([1..2, 1..2]),
                Block::from([0..1, 0..1]),
                Block::from([1..2, 1..2]),
            ]
            .into_iter(),
        );
        assert_eq!(blocks, vec![Block::from([1..2, 1..2]), Block::from([0..1, 0..1])]);
    }

    #[test]
    fn test_classification() {
        let solver = AlsSharedSystem::new(
            pool(array![[0, 0, 1], [1, 0, 0]], 10),
            measurements(12),
            Array2::ones((12, 2)),
        )
        .unwrap();
        assert_eq!(solver.core_position(), 0);
        assert_eq!(solver.classify(0, 1, Direction::Right), Some(Update::Direct));
        assert_eq!(solver.classify(0, 2, Direction::Right), Some(Update::CarryBehind));
        assert_eq!(solver.classify(1, 2, Direction::Right), Some(Update::CarryAhead));
        assert_eq!(solver.classify(0, 2, Direction::Left), Some(Update::Direct));
    }

    #[test]
    fn test_residual_matches_evaluate() {
        let sys = pool(array![[0, 0, 1], [1, 0, 0]], 20);
        let meas = measurements(12);
        let values = Array2::from_shape_fn((12, 2), |(n, d)| (n as f64 * 0.1).sin() + d as f64);
        let solver = AlsSharedSystem::new(sys, meas.clone(), values.clone()).unwrap();
        let full = solver.system().evaluate(&meas).unwrap();
        let expected = relative_error(full.iter(), values.iter());
        assert!((solver.residual().unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_microstep_keeps_pool_consistent() {
        let sys = pool(array![[0, 0, 1], [1, 0, 0]], 30);
        let meas = measurements(16);
        let values = pool(array![[0, 0, 1], [1, 0, 0]], 40).evaluate(&meas).unwrap();
        let mut solver = AlsSharedSystem::new(sys, meas, values).unwrap();
        solver.microstep(Direction::Right).unwrap();
        solver.system().verify().unwrap();
        assert!(solver.residual().unwrap().is_finite());
    }

    #[test]
    fn test_carry_behind_rescales_wrapped_neighbour() {
        // Train 0 serves both equations at position 0 and at the last position
        let sys = pool(array![[0, 0, 0], [0, 1, 0]], 50);
        let meas = measurements(16);
        let values = pool(array![[0, 0, 0], [0, 1, 0]], 60).evaluate(&meas).unwrap();
        let mut solver = AlsSharedSystem::new(sys, meas.clone(), values).unwrap();
        let untouched = solver.system().component(1, 2).clone();
        solver.microstep(Direction::Right).unwrap();
        solver.system().verify().unwrap();
        assert_eq!(solver.system().component(1, 2), &untouched);
        assert_eq!(solver.stacks().left_top().unwrap()[0].dim(), (16, 1));
    }

    #[test]
    fn test_run_reports_warm_start() {
        let sys = pool(array![[0, 0, 1], [1, 0, 0]], 70);
        let meas = measurements(20);
        let values = pool(array![[0, 0, 1], [1, 0, 0]], 80).evaluate(&meas).unwrap();
        let config = AlsConfig::default()
            .with_max_sweeps(3)
            .with_min_decrease(SHARED_MIN_DECREASE);
        let mut solver = AlsSharedSystem::with_config(sys, meas, values, config).unwrap();
        let report = solver.run().unwrap();
        assert!(report.sweeps >= 1 && report.sweeps <= 3);
        assert_eq!(solver.core_position(), 0);
    }

    #[test]
    fn test_rejects_wrong_equation_count() {
        let sys = pool(array![[0, 0, 1], [1, 0, 0]], 1);
        assert!(AlsSharedSystem::new(sys, measurements(12), Array2::ones((12, 3))).is_err());
    }
}
