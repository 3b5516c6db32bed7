//! Sweep controller shared by all ALS variants
//!
//! A variant implements [`LocalSolver`]: it builds and solves the local
//! subproblem at the current core position and keeps its stacks in step with
//! core moves. [`SweepEngine`] owns the control flow:
//!
//! ```text
//! initial residual
//! for sweep in 0..max_sweeps:
//!     microstep + move right   while position < right_sweep_end
//!     microstep + move left    while position > 0
//!     [terminal microstep]
//!     check target, divergence, stall (in this order)
//! exhausted
//! ```

use std::fmt;

use bstt_core::Direction;

use crate::config::AlsConfig;
use crate::error::Result;
use crate::tracing_support::{record_sweep, record_termination, record_transition};

/// Which of the optional termination checks a variant applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Stop when a sweep increases the residual
    pub check_divergence: bool,
    /// Stop when a sweep decreases the residual by less than `min_decrease`
    pub check_stall: bool,
    /// Apply neither check after the first sweep
    pub skip_first_sweep: bool,
}

impl TerminationPolicy {
    /// Divergence and stall checks after every sweep
    pub const STRICT: Self = Self {
        check_divergence: true,
        check_stall: true,
        skip_first_sweep: false,
    };

    /// Only the target residual and the sweep budget end a run
    pub const TARGET_ONLY: Self = Self {
        check_divergence: false,
        check_stall: false,
        skip_first_sweep: false,
    };

    /// Divergence and stall checks from the second sweep on
    pub const WARM_START: Self = Self {
        check_divergence: true,
        check_stall: true,
        skip_first_sweep: true,
    };
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    TargetReached,
    Diverged,
    Stalled,
    Exhausted,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::TargetReached => "target residual reached",
            Termination::Diverged => "residual increases",
            Termination::Stalled => "minimal decrease reached",
            Termination::Exhausted => "maximal sweeps reached",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`SweepEngine::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    /// Completed sweeps
    pub sweeps: usize,
    pub initial_residual: f64,
    /// Residual the run reports as its result
    ///
    /// Equals `last_residual` except after divergence, where it is the
    /// residual before the diverging sweep.
    pub final_residual: f64,
    /// Residual after the last completed sweep
    pub last_residual: f64,
    pub termination: Termination,
}

/// One ALS variant: local subproblems plus stack maintenance
pub trait LocalSolver {
    /// Assembled local system, consumed by [`LocalSolver::solve_subproblem`]
    type Subproblem;

    /// Name used in log events
    fn name(&self) -> &'static str;

    fn order(&self) -> usize;

    fn core_position(&self) -> usize;

    /// Build the local system at the current core position
    ///
    /// `direction` is the direction of the half sweep in progress.
    fn build_subproblem(&self, direction: Direction) -> Result<Self::Subproblem>;

    /// Solve the local system and write the result into the train
    fn solve_subproblem(&mut self, subproblem: Self::Subproblem) -> Result<()>;

    /// Move the core one step and update the stacks accordingly
    fn update_stacks(&mut self, direction: Direction) -> Result<()>;

    fn residual(&self) -> Result<f64>;

    /// Whether every stack slot is materialized
    fn stacks_valid(&self) -> bool;

    fn policy(&self) -> TerminationPolicy;

    /// Position at which the right half sweep stops
    fn right_sweep_end(&self) -> usize {
        self.order().saturating_sub(1)
    }

    /// Whether a sweep ends with one more microstep at position 0
    fn terminal_microstep(&self) -> bool {
        false
    }

    fn on_sweep_start(&mut self, _sweep: usize) -> Result<()> {
        Ok(())
    }

    fn on_sweep_end(&mut self, _sweep: usize, _residual: f64) -> Result<()> {
        Ok(())
    }

    /// Build and solve the local system
    fn microstep(&mut self, direction: Direction) -> Result<()> {
        let subproblem = self.build_subproblem(direction)?;
        self.solve_subproblem(subproblem)
    }
}

/// Drives a [`LocalSolver`] through sweeps until a termination check fires
pub struct SweepEngine<'a, S: LocalSolver> {
    solver: &'a mut S,
    config: &'a AlsConfig,
}

impl<'a, S: LocalSolver> SweepEngine<'a, S> {
    pub fn new(solver: &'a mut S, config: &'a AlsConfig) -> Self {
        Self { solver, config }
    }

    pub fn run(&mut self) -> Result<SweepReport> {
        let name = self.solver.name();
        let policy = self.solver.policy();

        let initial_residual = self.solver.residual()?;
        tracing::info!(
            solver = name,
            residual = %format_args!("{:.2e}", initial_residual),
            "initial residual"
        );

        let mut prev_residual = initial_residual;
        let mut residual = initial_residual;
        for sweep in 0..self.config.max_sweeps {
            self.solver.on_sweep_start(sweep)?;

            while self.solver.core_position() < self.solver.right_sweep_end() {
                self.microstep(Direction::Right)?;
                self.step(Direction::Right)?;
            }
            while self.solver.core_position() > 0 {
                self.microstep(Direction::Left)?;
                self.step(Direction::Left)?;
            }
            if self.solver.terminal_microstep() {
                self.microstep(Direction::Left)?;
            }

            residual = self.solver.residual()?;
            record_sweep(name, sweep, residual);

            let checked = !policy.skip_first_sweep || sweep > 0;
            let termination = if residual < self.config.target_residual {
                Some(Termination::TargetReached)
            } else if checked && policy.check_divergence && residual > prev_residual {
                Some(Termination::Diverged)
            } else if checked
                && policy.check_stall
                && prev_residual - residual < self.config.min_decrease * residual
            {
                Some(Termination::Stalled)
            } else {
                None
            };

            if let Some(termination) = termination {
                let final_residual = if termination == Termination::Diverged {
                    prev_residual
                } else {
                    residual
                };
                record_termination(name, termination, final_residual);
                return Ok(SweepReport {
                    sweeps: sweep + 1,
                    initial_residual,
                    final_residual,
                    last_residual: residual,
                    termination,
                });
            }

            prev_residual = residual;
            self.solver.on_sweep_end(sweep, residual)?;
        }

        record_termination(name, Termination::Exhausted, residual);
        Ok(SweepReport {
            sweeps: self.config.max_sweeps,
            initial_residual,
            final_residual: residual,
            last_residual: residual,
            termination: Termination::Exhausted,
        })
    }

    fn microstep(&mut self, direction: Direction) -> Result<()> {
        let position = self.solver.core_position();
        if tracing::enabled!(tracing::Level::DEBUG) && self.solver.stacks_valid() {
            let before = self.solver.residual()?;
            self.solver.microstep(direction)?;
            record_transition("microstep", position, before, self.solver.residual()?);
            Ok(())
        } else {
            self.solver.microstep(direction)
        }
    }

    fn step(&mut self, direction: Direction) -> Result<()> {
        let position = self.solver.core_position();
        if tracing::enabled!(tracing::Level::DEBUG) && self.solver.stacks_valid() {
            let before = self.solver.residual()?;
            self.solver.update_stacks(direction)?;
            record_transition("move_core", position, before, self.solver.residual()?);
            Ok(())
        } else {
            self.solver.update_stacks(direction)
        }
    }
}
