//! Solver configuration
//!
//! One [`AlsConfig`] drives every solver. Fields a variant does not use are
//! ignored by it: only the regression solver reads `method`, `increase_ranks`
//! and the rank adaptation knobs, only the selection system reads
//! `ridge_factor`.

use std::fmt;
use std::str::FromStr;

pub use bstt_kernels::LassoCvConfig;

use crate::error::{AlsError, Result};

/// Local solver used by the regression variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Cross-validated lasso in Gramian-whitened coordinates
    #[default]
    L1,
    /// Minimum-norm least squares
    L2,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::L1 => "l1",
            Method::L2 => "l2",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = AlsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l1" => Ok(Method::L1),
            "l2" => Ok(Method::L2),
            other => Err(AlsError::InvalidMethod(other.to_string())),
        }
    }
}

/// Upper bound on the size a bond slice may grow to during rank adaptation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSizeCap {
    /// Same cap on every bond
    Uniform(usize),
    /// One cap per bond `p|p+1`, for `p` in `0..order-1`
    PerBond(Vec<usize>),
}

impl GroupSizeCap {
    /// Cap for bond `bond|bond+1`
    ///
    /// Bonds past the end of a per-bond list reuse its last entry.
    pub fn cap(&self, bond: usize) -> usize {
        match self {
            GroupSizeCap::Uniform(cap) => *cap,
            GroupSizeCap::PerBond(caps) => caps
                .get(bond)
                .or_else(|| caps.last())
                .copied()
                .unwrap_or(0),
        }
    }

    fn validate(&self) -> Result<()> {
        let zero = match self {
            GroupSizeCap::Uniform(cap) => *cap == 0,
            GroupSizeCap::PerBond(caps) => caps.is_empty() || caps.contains(&0),
        };
        if zero {
            return Err(AlsError::InvalidConfig(format!(
                "group size caps must be positive, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for GroupSizeCap {
    fn default() -> Self {
        GroupSizeCap::Uniform(3)
    }
}

/// Sweep, termination and local solver settings
#[derive(Debug, Clone)]
pub struct AlsConfig {
    /// Upper bound on the number of full sweeps
    pub max_sweeps: usize,
    /// Stop successfully once the residual drops below this value
    pub target_residual: f64,
    /// Relative decrease per sweep below which a run counts as stalled
    pub min_decrease: f64,
    /// Sweeps to run before rank adaptation starts
    pub initial_sweeps: usize,
    pub increase_ranks: bool,
    /// `smin = residual * smin_factor` gates rank increases
    pub smin_factor: f64,
    pub max_group_size: GroupSizeCap,
    pub method: Method,
    /// Ridge coefficient is `s_max * ridge_factor * previous residual`
    pub ridge_factor: f64,
    pub lasso: LassoCvConfig,
}

impl Default for AlsConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 100,
            target_residual: 1e-8,
            min_decrease: 1e-4,
            initial_sweeps: 2,
            increase_ranks: false,
            smin_factor: 0.01,
            max_group_size: GroupSizeCap::default(),
            method: Method::default(),
            ridge_factor: 1e-12,
            lasso: LassoCvConfig::default(),
        }
    }
}

impl AlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    pub fn with_target_residual(mut self, target: f64) -> Self {
        self.target_residual = target;
        self
    }

    pub fn with_min_decrease(mut self, min_decrease: f64) -> Self {
        self.min_decrease = min_decrease;
        self
    }

    pub fn with_initial_sweeps(mut self, sweeps: usize) -> Self {
        self.initial_sweeps = sweeps;
        self
    }

    /// Enable or disable rank adaptation
    pub fn with_increase_ranks(mut self, enabled: bool) -> Self {
        self.increase_ranks = enabled;
        self
    }

    pub fn with_smin_factor(mut self, factor: f64) -> Self {
        self.smin_factor = factor;
        self
    }

    pub fn with_max_group_size(mut self, cap: GroupSizeCap) -> Self {
        self.max_group_size = cap;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_ridge_factor(mut self, factor: f64) -> Self {
        self.ridge_factor = factor;
        self
    }

    pub fn with_lasso(mut self, lasso: LassoCvConfig) -> Self {
        self.lasso = lasso;
        self
    }

    /// Reject settings no run could honour
    pub fn validate(&self) -> Result<()> {
        if self.max_sweeps == 0 {
            return Err(AlsError::InvalidConfig(
                "max_sweeps must be at least 1".to_string(),
            ));
        }
        if !(self.target_residual > 0.0) {
            return Err(AlsError::InvalidConfig(format!(
                "target_residual must be positive, got {}",
                self.target_residual
            )));
        }
        for (name, value) in [
            ("min_decrease", self.min_decrease),
            ("smin_factor", self.smin_factor),
            ("ridge_factor", self.ridge_factor),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(AlsError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        self.max_group_size.validate()?;
        if self.lasso.n_alphas == 0 || self.lasso.cv < 2 {
            return Err(AlsError::InvalidConfig(format!(
                "lasso needs at least one alpha and two folds, got {} and {}",
                self.lasso.n_alphas, self.lasso.cv
            )));
        }
        Ok(())
    }
}
