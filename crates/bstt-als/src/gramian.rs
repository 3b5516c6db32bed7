//! Local Gramians and their stacks
//!
//! Each mode carries an L2 and an H1 Gramian over its basis functions. Moving
//! the core contracts the vacated component against the mode Gramian and the
//! previous stack entry:
//!
//! ```text
//! left:  G'[k, n] = Σ C[i, j, k] S[i, l] G[j, m] C[l, m, n]
//! right: G'[i, l] = Σ C[i, j, k] G[j, m] S[k, n] C[l, m, n]
//! ```

use scirs2_core::ndarray_ext::{Array2, ArrayView2, ArrayView3};

use bstt_kernels::{kronecker, sym_eigh};

use crate::contract::{unfold_left, unfold_right};
use crate::error::{AlsError, Result};

/// Per-mode L2 and H1 Gramians
#[derive(Debug, Clone)]
pub struct LocalGramians {
    l2: Vec<Array2<f64>>,
    h1: Vec<Array2<f64>>,
}

impl LocalGramians {
    /// Identity Gramians for the given mode dimensions
    pub fn identity(dimensions: &[usize]) -> Self {
        let eye: Vec<Array2<f64>> = dimensions.iter().map(|&d| Array2::eye(d)).collect();
        Self {
            l2: eye.clone(),
            h1: eye,
        }
    }

    /// Validate user supplied Gramians; `None` stands for identities
    ///
    /// Every Gramian must be square with the mode's dimension, symmetric and
    /// positive semi-definite (eigenvalues rounded to 14 decimals).
    pub fn new(
        dimensions: &[usize],
        l2: Option<Vec<Array2<f64>>>,
        h1: Option<Vec<Array2<f64>>>,
    ) -> Result<Self> {
        let identity = Self::identity(dimensions);
        let l2 = match l2 {
            Some(gramians) => check_gramians(dimensions, gramians)?,
            None => identity.l2,
        };
        let h1 = match h1 {
            Some(gramians) => check_gramians(dimensions, gramians)?,
            None => identity.h1,
        };
        Ok(Self { l2, h1 })
    }

    pub fn l2(&self, mode: usize) -> &Array2<f64> {
        &self.l2[mode]
    }

    pub fn h1(&self, mode: usize) -> &Array2<f64> {
        &self.h1[mode]
    }

    pub fn order(&self) -> usize {
        self.l2.len()
    }
}

fn check_gramians(dimensions: &[usize], gramians: Vec<Array2<f64>>) -> Result<Vec<Array2<f64>>> {
    if gramians.len() != dimensions.len() {
        return Err(AlsError::InvalidConfig(format!(
            "expected {} Gramians, got {}",
            dimensions.len(),
            gramians.len()
        )));
    }
    for (mode, (g, &d)) in gramians.iter().zip(dimensions).enumerate() {
        if g.dim() != (d, d) {
            return Err(AlsError::InvalidGramian {
                mode,
                message: format!("shape {:?}, expected ({}, {})", g.shape(), d, d),
            });
        }
        let asymmetric = g
            .indexed_iter()
            .any(|((i, j), &v)| (v - g[[j, i]]).abs() > 1e-14 + 1e-14 * g[[j, i]].abs());
        if asymmetric {
            return Err(AlsError::InvalidGramian {
                mode,
                message: "not symmetric".to_string(),
            });
        }
        let (eigenvalues, _) = sym_eigh(&g.view())?;
        if let Some(&lambda) = eigenvalues
            .iter()
            .find(|&&v| (v * 1e14).round() / 1e14 < 0.0)
        {
            return Err(AlsError::InvalidGramian {
                mode,
                message: format!("negative eigenvalue {:e}", lambda),
            });
        }
    }
    Ok(gramians)
}

/// Gramian stack entry right of a component moved behind the core (left move)
pub fn gramian_step_right(
    core: &ArrayView3<f64>,
    local: &ArrayView2<f64>,
    stack: &ArrayView2<f64>,
) -> Result<Array2<f64>> {
    let unfolded = unfold_right(core)?;
    let weight = kronecker(local, stack);
    Ok(unfolded.dot(&weight).dot(&unfolded.t()))
}

/// Gramian stack entry left of a component moved behind the core (right move)
pub fn gramian_step_left(
    core: &ArrayView3<f64>,
    local: &ArrayView2<f64>,
    stack: &ArrayView2<f64>,
) -> Result<Array2<f64>> {
    let unfolded = unfold_left(core)?;
    let weight = kronecker(stack, local);
    Ok(unfolded.t().dot(&weight).dot(&unfolded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray_ext::{array, Array3};

    #[test]
    fn test_rejects_asymmetric() {
        let err = LocalGramians::new(&[2], Some(vec![array![[1.0, 0.5], [0.0, 1.0]]]), None)
            .unwrap_err();
        assert!(matches!(err, AlsError::InvalidGramian { mode: 0, .. }));
    }

    #[test]
    fn test_rejects_indefinite() {
        let err = LocalGramians::new(&[2], None, Some(vec![array![[1.0, 2.0], [2.0, 1.0]]]))
            .unwrap_err();
        assert!(matches!(err, AlsError::InvalidGramian { .. }));
    }

    #[test]
    fn test_rejects_wrong_shape() {
        assert!(LocalGramians::new(&[3], Some(vec![Array2::eye(2)]), None).is_err());
        assert!(LocalGramians::new(&[3, 3], Some(vec![Array2::eye(3)]), None).is_err());
    }

    #[test]
    fn test_orthonormal_core_keeps_identity() {
        // Columns of the (l*e, r) unfolding are orthonormal
        let core = Array3::from_shape_vec(
            (1, 2, 2),
            vec![0.6, 0.8, 0.8, -0.6],
        )
        .unwrap();
        let next = gramian_step_left(&core.view(), &Array2::eye(2).view(), &Array2::eye(1).view())
            .unwrap();
        for ((i, j), v) in next.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_steps_match_direct_sum() {
        let core = Array3::from_shape_fn((2, 2, 2), |(i, j, k)| (i + 2 * j + 3 * k) as f64 - 2.5);
        let g = array![[2.0, 0.5], [0.5, 1.0]];
        let s = array![[1.0, 0.2], [0.2, 3.0]];

        let right = gramian_step_right(&core.view(), &g.view(), &s.view()).unwrap();
        let left = gramian_step_left(&core.view(), &g.view(), &s.view()).unwrap();
        for a in 0..2 {
            for b in 0..2 {
                let (mut r_direct, mut l_direct) = (0.0, 0.0);
                for j in 0..2 {
                    for m in 0..2 {
                        for x in 0..2 {
                            for y in 0..2 {
                                r_direct += core[[a, j, x]] * g[[j, m]] * s[[x, y]] * core[[b, m, y]];
                                l_direct += core[[x, j, a]] * s[[x, y]] * g[[j, m]] * core[[y, m, b]];
                            }
                        }
                    }
                }
                assert!((right[[a, b]] - r_direct).abs() < 1e-10);
                assert!((left[[a, b]] - l_direct).abs() < 1e-10);
            }
        }
    }
}
