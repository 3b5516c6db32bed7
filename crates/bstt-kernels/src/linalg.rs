//! Dense linear algebra helpers for local subproblems
//!
//! Thin wrappers over `scirs2_linalg` that fix the conventions the ALS
//! solvers rely on: minimum-norm least squares with a relative singular value
//! cutoff, eigen-decompositions sorted ascending, and square solves that fall
//! back to least squares on singular systems.
//!
//! # SciRS2 Integration
//!
//! Factorizations use `scirs2_linalg::{svd, eigh, solve}`. Least squares and
//! null spaces share the numpy/scipy singular value cut-off.

use scirs2_core::ndarray_ext::{s, Array1, Array2, ArrayView1, ArrayView2};
use scirs2_linalg::{eigh, solve, svd};

use crate::error::{KernelError, KernelResult};

/// Minimum-norm least-squares solution of `a x ≈ b`
///
/// Singular values below `eps * max(m, n) * s_max` are treated as zero,
/// which yields the minimum-norm solution for rank-deficient systems.
pub fn lstsq_min_norm(a: &ArrayView2<f64>, b: &ArrayView1<f64>) -> KernelResult<Array1<f64>> {
    let (m, n) = a.dim();
    if b.len() != m {
        return Err(KernelError::dimension_mismatch(
            "lstsq_min_norm",
            vec![m],
            vec![b.len()],
            "Right-hand side length must equal the number of rows",
        ));
    }
    if m == 0 || n == 0 {
        return Ok(Array1::zeros(n));
    }

    let (u, s, vt) =
        svd(a, false, None).map_err(|e| KernelError::factorization("lstsq_min_norm", e))?;

    let s_max = s.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = f64::EPSILON * m.max(n) as f64 * s_max;

    let mut x = Array1::<f64>::zeros(n);
    for (idx, &sigma) in s.iter().enumerate() {
        if sigma <= cutoff || sigma == 0.0 {
            continue;
        }
        let coeff = u.column(idx).dot(b) / sigma;
        x.scaled_add(coeff, &vt.row(idx));
    }
    Ok(x)
}

/// Solve a square system, falling back to least squares when it is singular
pub fn solve_or_lstsq(a: &ArrayView2<f64>, b: &ArrayView1<f64>) -> KernelResult<Array1<f64>> {
    let (m, n) = a.dim();
    if m != n {
        return lstsq_min_norm(a, b);
    }
    match solve(a, b, None) {
        Ok(x) if x.iter().all(|v| v.is_finite()) => Ok(x),
        _ => {
            tracing::debug!(size = n, "square solve failed; falling back to least squares");
            lstsq_min_norm(a, b)
        }
    }
}

/// Tikhonov-regularized least squares: `(aᵀa + αI) x = aᵀb`
pub fn ridge_solve(
    a: &ArrayView2<f64>,
    b: &ArrayView1<f64>,
    alpha: f64,
) -> KernelResult<Array1<f64>> {
    let (m, n) = a.dim();
    if b.len() != m {
        return Err(KernelError::dimension_mismatch(
            "ridge_solve",
            vec![m],
            vec![b.len()],
            "Right-hand side length must equal the number of rows",
        ));
    }

    let mut gram = a.t().dot(a);
    for i in 0..n {
        gram[[i, i]] += alpha;
    }
    let rhs = a.t().dot(b);
    solve_or_lstsq(&gram.view(), &rhs.view())
}

/// Symmetric eigen-decomposition with eigenvalues sorted ascending
///
/// Column `j` of the returned matrix is the eigenvector of eigenvalue `j`.
pub fn sym_eigh(a: &ArrayView2<f64>) -> KernelResult<(Array1<f64>, Array2<f64>)> {
    let (m, n) = a.dim();
    if m != n {
        return Err(KernelError::dimension_mismatch(
            "sym_eigh",
            vec![m, m],
            vec![m, n],
            "Matrix must be square",
        ));
    }
    if n == 0 {
        return Ok((Array1::zeros(0), Array2::zeros((0, 0))));
    }

    // Symmetrize to remove round-off asymmetry from accumulated products
    let sym = (a + &a.t()) * 0.5;
    let (values, vectors) =
        eigh(&sym.view(), None).map_err(|e| KernelError::factorization("sym_eigh", e))?;

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let sorted_values = Array1::from_iter(order.iter().map(|&i| values[i]));
    let mut sorted_vectors = Array2::<f64>::zeros((n, order.len()));
    for (dst, &src) in order.iter().enumerate() {
        sorted_vectors.column_mut(dst).assign(&vectors.column(src));
    }
    Ok((sorted_values, sorted_vectors))
}

/// Orthonormal basis of the null space of `a`, one vector per column
///
/// Taken from the trailing right singular vectors of a full SVD. Singular
/// values at or below `eps * max(m, n) * s_max` count as zero. An empty `a`
/// has the full space as its null space.
pub fn null_space(a: &ArrayView2<f64>) -> KernelResult<Array2<f64>> {
    let (m, n) = a.dim();
    if m == 0 {
        return Ok(Array2::eye(n));
    }
    if n == 0 {
        return Ok(Array2::zeros((0, 0)));
    }

    let (_, s, vt) = svd(a, true, None).map_err(|e| KernelError::factorization("null_space", e))?;
    if vt.dim() != (n, n) {
        return Err(KernelError::dimension_mismatch(
            "null_space",
            vec![n, n],
            vt.shape().to_vec(),
            "Full SVD must return a square right factor",
        ));
    }

    let s_max = s.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = f64::EPSILON * m.max(n) as f64 * s_max;
    let rank = s.iter().filter(|&&sigma| sigma > cutoff).count();

    Ok(vt.slice(s![rank.., ..]).t().to_owned())
}

/// Singular values of `a`, in the order returned by the backend
pub fn singular_values(a: &ArrayView2<f64>) -> KernelResult<Array1<f64>> {
    if a.is_empty() {
        return Ok(Array1::zeros(0));
    }
    let (_, s, _) = svd(a, false, None).map_err(|e| KernelError::factorization("svd", e))?;
    Ok(s)
}

/// Largest singular value of `a` (zero for an empty matrix)
pub fn leading_singular_value(a: &ArrayView2<f64>) -> KernelResult<f64> {
    Ok(singular_values(a)?.iter().cloned().fold(0.0_f64, f64::max))
}

/// Check `m mᵀ ≈ I` entry-wise within `tol`
pub fn is_orthonormal_rows(m: &ArrayView2<f64>, tol: f64) -> bool {
    let gram = m.dot(&m.t());
    is_identity(&gram.view(), tol)
}

/// Check `mᵀ m ≈ I` entry-wise within `tol`
pub fn is_orthonormal_columns(m: &ArrayView2<f64>, tol: f64) -> bool {
    let gram = m.t().dot(m);
    is_identity(&gram.view(), tol)
}

/// Check that a square matrix equals the identity entry-wise within `tol`
pub fn is_identity(m: &ArrayView2<f64>, tol: f64) -> bool {
    let (r, c) = m.dim();
    r == c
        && m
            .indexed_iter()
            .all(|((i, j), &v)| (v - if i == j { 1.0 } else { 0.0 }).abs() <= tol)
}

/// Round every entry to the given number of decimals
pub fn round_decimals(m: &mut Array2<f64>, decimals: i32) {
    let scale = 10f64.powi(decimals);
    m.mapv_inplace(|v| (v * scale).round() / scale);
}
