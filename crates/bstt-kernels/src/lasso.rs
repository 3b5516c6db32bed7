//! L1-regularized least squares with cross-validated regularization strength
//!
//! Minimizes `1/(2n) ||y - X b||² + α ||b||₁` by cyclic coordinate descent.
//! [`LassoCv`] walks a log-spaced path of α values from `α_max = max|Xᵀy|/n`
//! down to `α_max * eps`, scores each α by mean squared error over contiguous
//! folds, and refits on all rows at the best α. No intercept is fitted.
//!
//! # SciRS2 Integration
//!
//! All array operations use `scirs2_core::ndarray_ext`.

use scirs2_core::ndarray_ext::{Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{KernelError, KernelResult};

/// Configuration of the cross-validated lasso
#[derive(Debug, Clone, PartialEq)]
pub struct LassoCvConfig {
    /// Ratio `α_min / α_max` of the regularization path
    pub eps: f64,
    /// Number of α values on the path
    pub n_alphas: usize,
    /// Number of cross-validation folds (capped by the number of rows)
    pub cv: usize,
    /// Coordinate descent sweeps per α
    pub max_iter: usize,
    /// Duality-gap tolerance, relative to `‖y‖²`
    pub tol: f64,
}

impl Default for LassoCvConfig {
    fn default() -> Self {
        Self {
            eps: 1e-7,
            n_alphas: 100,
            cv: 10,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

impl LassoCvConfig {
    /// Sets the number of folds.
    pub fn with_cv(mut self, cv: usize) -> Self {
        self.cv = cv;
        self
    }

    /// Sets the number of α values on the path.
    pub fn with_n_alphas(mut self, n_alphas: usize) -> Self {
        self.n_alphas = n_alphas;
        self
    }

    /// Sets the coordinate descent iteration limit.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

/// Result of a cross-validated lasso fit
#[derive(Debug, Clone)]
pub struct LassoFit {
    pub coefficients: Array1<f64>,
    /// Selected regularization strength
    pub alpha: f64,
    /// Whether the final refit met the duality-gap tolerance
    pub converged: bool,
}

#[inline]
fn soft_threshold(x: f64, lambda: f64) -> f64 {
    if x > lambda {
        x - lambda
    } else if x < -lambda {
        x + lambda
    } else {
        0.0
    }
}

/// Lasso duality gap for the objective scaled by `n`
fn duality_gap(
    x: &ArrayView2<f64>,
    y: &ArrayView1<f64>,
    beta: &Array1<f64>,
    residual: &Array1<f64>,
    scaled_alpha: f64,
) -> f64 {
    let xtr = x.t().dot(residual);
    let dual_norm = xtr.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let r_norm2 = residual.dot(residual);

    let (constant, mut gap) = if dual_norm > scaled_alpha {
        let c = scaled_alpha / dual_norm;
        (c, 0.5 * (r_norm2 + r_norm2 * c * c))
    } else {
        (1.0, r_norm2)
    };

    let l1: f64 = beta.iter().map(|b| b.abs()).sum();
    gap += scaled_alpha * l1 - constant * residual.dot(y);
    gap
}

/// Cyclic coordinate descent for a single α, optionally warm started
///
/// Returns the coefficients and whether the duality gap dropped below
/// `tol * ‖y‖²` within `max_iter` sweeps.
pub fn lasso_coordinate_descent(
    x: &ArrayView2<f64>,
    y: &ArrayView1<f64>,
    alpha: f64,
    warm_start: Option<&Array1<f64>>,
    max_iter: usize,
    tol: f64,
) -> (Array1<f64>, bool) {
    let (n_samples, n_features) = x.dim();
    let mut beta = match warm_start {
        Some(w) if w.len() == n_features => w.clone(),
        _ => Array1::<f64>::zeros(n_features),
    };
    if n_samples == 0 || n_features == 0 {
        return (beta, true);
    }

    let col_norms_sq: Vec<f64> = (0..n_features)
        .map(|j| x.column(j).dot(&x.column(j)))
        .collect();
    let scaled_alpha = alpha * n_samples as f64;
    let gap_tol = tol * y.dot(y);

    let mut residual = y.to_owned() - x.dot(&beta);

    for _ in 0..max_iter {
        let mut w_max = 0.0_f64;
        let mut d_w_max = 0.0_f64;

        for j in 0..n_features {
            if col_norms_sq[j] == 0.0 {
                continue;
            }
            let old = beta[j];
            let col = x.column(j);
            if old != 0.0 {
                residual.scaled_add(old, &col);
            }
            let rho = col.dot(&residual);
            let new = soft_threshold(rho, scaled_alpha) / col_norms_sq[j];
            if new != 0.0 {
                residual.scaled_add(-new, &col);
            }
            beta[j] = new;

            d_w_max = d_w_max.max((new - old).abs());
            w_max = w_max.max(new.abs());
        }

        if w_max == 0.0 || d_w_max / w_max < tol {
            let gap = duality_gap(x, y, &beta, &residual, scaled_alpha);
            if gap < gap_tol {
                return (beta, true);
            }
        }
    }

    (beta, false)
}

/// Cross-validated lasso
#[derive(Debug, Clone, Default)]
pub struct LassoCv {
    config: LassoCvConfig,
}

impl LassoCv {
    pub fn new(config: LassoCvConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LassoCvConfig {
        &self.config
    }

    /// Descending log-spaced regularization path for the given data
    pub fn alpha_grid(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Vec<f64> {
        let n = x.nrows().max(1) as f64;
        let alpha_max = x.t().dot(y).iter().fold(0.0_f64, |m, v| m.max(v.abs())) / n;
        if alpha_max <= f64::MIN_POSITIVE {
            return vec![f64::MIN_POSITIVE; self.config.n_alphas.max(1)];
        }

        let count = self.config.n_alphas.max(1);
        if count == 1 {
            return vec![alpha_max];
        }
        let log_max = alpha_max.log10();
        let log_min = (alpha_max * self.config.eps).log10();
        (0..count)
            .map(|k| {
                let t = k as f64 / (count - 1) as f64;
                10f64.powf(log_max + t * (log_min - log_max))
            })
            .collect()
    }

    /// Fit on all rows of `x`, choosing α by k-fold cross validation
    pub fn fit(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> KernelResult<LassoFit> {
        let (n_samples, n_features) = x.dim();
        if y.len() != n_samples {
            return Err(KernelError::dimension_mismatch(
                "lasso_cv",
                vec![n_samples],
                vec![y.len()],
                "Target length must equal the number of rows",
            ));
        }
        if n_samples == 0 {
            return Err(KernelError::empty_input("lasso_cv", "x"));
        }

        let alphas = self.alpha_grid(x, y);
        let folds = self.config.cv.min(n_samples);

        let best = if folds < 2 {
            alphas.len() - 1
        } else {
            let mse = self.path_mse(x, y, &alphas, folds);
            mse.iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(alphas.len() - 1)
        };

        let mut beta = Array1::<f64>::zeros(n_features);
        let mut converged = true;
        for &alpha in &alphas[..=best] {
            let (b, ok) = lasso_coordinate_descent(
                x,
                y,
                alpha,
                Some(&beta),
                self.config.max_iter,
                self.config.tol,
            );
            beta = b;
            converged = ok;
        }

        if !converged {
            tracing::debug!(
                alpha = alphas[best],
                max_iter = self.config.max_iter,
                "coordinate descent did not converge"
            );
        }

        Ok(LassoFit {
            coefficients: beta,
            alpha: alphas[best],
            converged,
        })
    }

    /// Mean test MSE per α over contiguous folds
    fn path_mse(
        &self,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        alphas: &[f64],
        folds: usize,
    ) -> Vec<f64> {
        let n_samples = x.nrows();
        let mut mse = vec![0.0; alphas.len()];

        let mut start = 0;
        for fold in 0..folds {
            let size = n_samples / folds + usize::from(fold < n_samples % folds);
            let test: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..n_samples)
                .filter(|i| *i < start || *i >= start + size)
                .collect();
            start += size;

            let x_train = x.select(Axis(0), &train);
            let y_train = y.select(Axis(0), &train);
            let x_test = x.select(Axis(0), &test);
            let y_test = y.select(Axis(0), &test);

            let mut beta = Array1::<f64>::zeros(x.ncols());
            for (idx, &alpha) in alphas.iter().enumerate() {
                let (b, _) = lasso_coordinate_descent(
                    &x_train.view(),
                    &y_train.view(),
                    alpha,
                    Some(&beta),
                    self.config.max_iter,
                    self.config.tol,
                );
                beta = b;

                let err = &y_test - &x_test.dot(&beta);
                mse[idx] += err.dot(&err) / test.len().max(1) as f64 / folds as f64;
            }
        }

        mse
    }
}
