//! Row-wise and per-sample products used by ALS subproblems
//!
//! The face-splitting product is the row-wise Kronecker product: for
//! A (N × I) and B (N × J), row n of A • B is kron(A\[n, :\], B\[n, :\]).
//! It plays the role the Khatri-Rao product plays for CP-ALS.
//!
//! The `sample_*` kernels operate on per-sample stacks with layout
//! (rank, N, rank) or (rank, N) where the middle axis indexes samples.
//!
//! # SciRS2 Integration
//!
//! All array operations use `scirs2_core::ndarray_ext`.

use scirs2_core::ndarray_ext::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};

/// Face-splitting (row-wise Kronecker) product
///
/// For A (N × I) and B (N × J) the result has shape (N, I*J) with
/// `result[n, i*J + j] = A[n, i] * B[n, j]`.
///
/// # Panics
///
/// Panics if the row counts of A and B differ.
///
/// # Examples
///
/// ```
/// use scirs2_core::ndarray_ext::array;
/// use bstt_kernels::face_splitting;
///
/// let a = array![[1.0, 2.0], [3.0, 4.0]];
/// let b = array![[5.0, 6.0, 7.0], [8.0, 9.0, 10.0]];
/// let c = face_splitting(&a.view(), &b.view());
/// assert_eq!(c.shape(), &[2, 6]);
/// assert_eq!(c[[0, 4]], 12.0);
/// assert_eq!(c[[1, 0]], 24.0);
/// ```
pub fn face_splitting(a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array2<f64> {
    let (n, i) = a.dim();
    let (n_b, j) = b.dim();

    assert_eq!(
        n, n_b,
        "Number of rows must match: A has {} rows, B has {} rows",
        n, n_b
    );

    let mut result = Array2::<f64>::zeros((n, i * j));

    for row in 0..n {
        for p in 0..i {
            let a_val = a[[row, p]];
            if a_val == 0.0 {
                continue;
            }
            for q in 0..j {
                result[[row, p * j + q]] = a_val * b[[row, q]];
            }
        }
    }

    result
}

/// Kronecker product of two matrices
///
/// For A (I × J) and B (K × L) the result has shape (I*K, J*L).
pub fn kronecker(a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array2<f64> {
    let (ia, ja) = a.dim();
    let (ib, jb) = b.dim();

    let mut result = Array2::<f64>::zeros((ia * ib, ja * jb));

    for ((r, c), &a_val) in a.indexed_iter() {
        if a_val == 0.0 {
            continue;
        }
        for ((p, q), &b_val) in b.indexed_iter() {
            result[[r * ib + p, c * jb + q]] = a_val * b_val;
        }
    }

    result
}

/// Block-diagonal matrix assembled from the given blocks in order
pub fn block_diag(blocks: &[Array2<f64>]) -> Array2<f64> {
    let rows: usize = blocks.iter().map(|b| b.nrows()).sum();
    let cols: usize = blocks.iter().map(|b| b.ncols()).sum();

    let mut result = Array2::<f64>::zeros((rows, cols));
    let (mut r0, mut c0) = (0, 0);
    for block in blocks {
        let (br, bc) = block.dim();
        for ((i, j), &v) in block.indexed_iter() {
            result[[r0 + i, c0 + j]] = v;
        }
        r0 += br;
        c0 += bc;
    }

    result
}

/// Contract the physical axis of a (l, e, r) core with measurements (N, e)
///
/// Returns the per-sample core with layout (l, N, r).
pub fn contract_mode(core: &ArrayView3<f64>, measurements: &ArrayView2<f64>) -> Array3<f64> {
    let (l, e, r) = core.dim();
    let (n, e_m) = measurements.dim();

    assert_eq!(
        e, e_m,
        "Physical dimension mismatch: core has {}, measurements have {}",
        e, e_m
    );

    let mut result = Array3::<f64>::zeros((l, n, r));
    for li in 0..l {
        let slab = core.index_axis(Axis(0), li);
        result
            .index_axis_mut(Axis(0), li)
            .assign(&measurements.dot(&slab));
    }
    result
}

/// Left per-sample congruence
///
/// `result[k, m, n] = Σ_{i,l} stack[i, m, l] * a[i, m, k] * b[l, m, n]`
pub fn sample_congruence_left(
    stack: &ArrayView3<f64>,
    a: &ArrayView3<f64>,
    b: &ArrayView3<f64>,
) -> Array3<f64> {
    let samples = stack.dim().1;
    assert_eq!(a.dim().1, samples, "Sample axis mismatch in left congruence");
    assert_eq!(b.dim().1, samples, "Sample axis mismatch in left congruence");

    let mut result = Array3::<f64>::zeros((a.dim().2, samples, b.dim().2));
    for m in 0..samples {
        let s_m = stack.index_axis(Axis(1), m);
        let a_m = a.index_axis(Axis(1), m);
        let b_m = b.index_axis(Axis(1), m);
        result
            .index_axis_mut(Axis(1), m)
            .assign(&a_m.t().dot(&s_m).dot(&b_m));
    }
    result
}

/// Right per-sample congruence
///
/// `result[i, m, l] = Σ_{k,n} a[i, m, k] * stack[k, m, n] * b[l, m, n]`
pub fn sample_congruence_right(
    stack: &ArrayView3<f64>,
    a: &ArrayView3<f64>,
    b: &ArrayView3<f64>,
) -> Array3<f64> {
    let samples = stack.dim().1;
    assert_eq!(a.dim().1, samples, "Sample axis mismatch in right congruence");
    assert_eq!(b.dim().1, samples, "Sample axis mismatch in right congruence");

    let mut result = Array3::<f64>::zeros((a.dim().0, samples, b.dim().0));
    for m in 0..samples {
        let s_m = stack.index_axis(Axis(1), m);
        let a_m = a.index_axis(Axis(1), m);
        let b_m = b.index_axis(Axis(1), m);
        result
            .index_axis_mut(Axis(1), m)
            .assign(&a_m.dot(&s_m).dot(&b_m.t()));
    }
    result
}

/// Left per-sample projection of a vector stack
///
/// `result[k, m] = w[m] * Σ_i stack[i, m] * a[i, m, k]`
pub fn sample_project_left(
    stack: &ArrayView2<f64>,
    a: &ArrayView3<f64>,
    weights: Option<&ArrayView1<f64>>,
) -> Array2<f64> {
    let (rank_in, samples, rank_out) = a.dim();
    assert_eq!(stack.dim(), (rank_in, samples), "Stack shape mismatch");

    let mut result = Array2::<f64>::zeros((rank_out, samples));
    for m in 0..samples {
        let w = weights.map_or(1.0, |w| w[m]);
        for i in 0..rank_in {
            let s = stack[[i, m]] * w;
            if s == 0.0 {
                continue;
            }
            for k in 0..rank_out {
                result[[k, m]] += s * a[[i, m, k]];
            }
        }
    }
    result
}

/// Right per-sample projection of a vector stack
///
/// `result[i, m] = w[m] * Σ_k a[i, m, k] * stack[k, m]`
pub fn sample_project_right(
    stack: &ArrayView2<f64>,
    a: &ArrayView3<f64>,
    weights: Option<&ArrayView1<f64>>,
) -> Array2<f64> {
    let (rank_out, samples, rank_in) = a.dim();
    assert_eq!(stack.dim(), (rank_in, samples), "Stack shape mismatch");

    let mut result = Array2::<f64>::zeros((rank_out, samples));
    for m in 0..samples {
        let w = weights.map_or(1.0, |w| w[m]);
        for i in 0..rank_out {
            let mut acc = 0.0;
            for k in 0..rank_in {
                acc += a[[i, m, k]] * stack[[k, m]];
            }
            result[[i, m]] = w * acc;
        }
    }
    result
}

/// Per-sample triple product summed over samples
///
/// For x (a, N, a'), y (b, N, b') and z (c, N, c') returns the
/// (a*b*c) × (a'*b'*c') matrix
/// `Σ_m x[i, m, k] * y[p, m, q] * z[l, m, n]` at row `(i*b + p)*c + l`
/// and column `(k*b' + q)*c' + n`.
pub fn sample_triple_product(
    x: &ArrayView3<f64>,
    y: &ArrayView3<f64>,
    z: &ArrayView3<f64>,
) -> Array2<f64> {
    let (xa, samples, xb) = x.dim();
    let (ya, y_samples, yb) = y.dim();
    let (za, z_samples, zb) = z.dim();
    assert_eq!(samples, y_samples, "Sample axis mismatch in triple product");
    assert_eq!(samples, z_samples, "Sample axis mismatch in triple product");

    let mut result = Array2::<f64>::zeros((xa * ya * za, xb * yb * zb));
    for m in 0..samples {
        for i in 0..xa {
            for k in 0..xb {
                let xv = x[[i, m, k]];
                if xv == 0.0 {
                    continue;
                }
                for p in 0..ya {
                    for q in 0..yb {
                        let xy = xv * y[[p, m, q]];
                        if xy == 0.0 {
                            continue;
                        }
                        let row_base = (i * ya + p) * za;
                        let col_base = (k * yb + q) * zb;
                        for l in 0..za {
                            for n in 0..zb {
                                result[[row_base + l, col_base + n]] += xy * z[[l, m, n]];
                            }
                        }
                    }
                }
            }
        }
    }
    result
}

/// Per-sample triple vector product summed over samples
///
/// For x (a, N), y (N, b) and z (c, N) returns the vector of length a*b*c
/// with entry `(i*b + p)*c + l` equal to `Σ_m w[m] * x[i, m] * y[m, p] * z[l, m]`.
pub fn sample_triple_vector(
    x: &ArrayView2<f64>,
    y: &ArrayView2<f64>,
    z: &ArrayView2<f64>,
    weights: Option<&ArrayView1<f64>>,
) -> Array1<f64> {
    let (xa, samples) = x.dim();
    let (y_samples, yb) = y.dim();
    let (za, z_samples) = z.dim();
    assert_eq!(samples, y_samples, "Sample axis mismatch in triple vector");
    assert_eq!(samples, z_samples, "Sample axis mismatch in triple vector");

    let mut result = Array1::<f64>::zeros(xa * yb * za);
    for m in 0..samples {
        let w = weights.map_or(1.0, |w| w[m]);
        for i in 0..xa {
            let xv = x[[i, m]] * w;
            if xv == 0.0 {
                continue;
            }
            for p in 0..yb {
                let xy = xv * y[[m, p]];
                let base = (i * yb + p) * za;
                for l in 0..za {
                    result[base + l] += xy * z[[l, m]];
                }
            }
        }
    }
    result
}
