//! Per-sample contractions of 3-way cores with data stacks
//!
//! Stacks of the scalar variants hold one row per sample: the left stack
//! `L (N, l)` contracts every core left of the current one with its
//! measurements, the right stack `R (N, r)` everything to the right. Then
//!
//! ```text
//! prediction[n] = Σ L[n, l] E[n, e] C[l, e, r] R[n, r]
//! ```

use scirs2_core::ndarray_ext::{s, Array1, Array2, ArrayD, ArrayView2, ArrayView3, Axis, Ix3};

use bstt_core::{Block, BlockSparseTensor};
use bstt_kernels::face_splitting;

use crate::error::{AlsError, Result};

/// View a dynamic-rank component as a (left, mode, right) core
pub fn as_core3(core: &ArrayD<f64>) -> Result<ArrayView3<'_, f64>> {
    core.view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| AlsError::ShapeMismatch(format!("expected a 3-way core: {}", e)))
}

/// Flatten the leading axes of a core into rows: (l, e, r) -> (l*e, r)
pub fn unfold_left(core: &ArrayView3<f64>) -> Result<Array2<f64>> {
    let (l, e, r) = core.dim();
    core.as_standard_layout()
        .into_owned()
        .into_shape_with_order((l * e, r))
        .map_err(|e| AlsError::ShapeMismatch(e.to_string()))
}

/// Flatten the trailing axes of a core into columns: (l, e, r) -> (l, e*r)
pub fn unfold_right(core: &ArrayView3<f64>) -> Result<Array2<f64>> {
    let (l, e, r) = core.dim();
    core.as_standard_layout()
        .into_owned()
        .into_shape_with_order((l, e * r))
        .map_err(|e| AlsError::ShapeMismatch(e.to_string()))
}

/// Push a core onto a left data stack: `Σ_{l,e} L[n, l] E[n, e] C[l, e, r]`
pub fn left_data_step(
    left: &ArrayView2<f64>,
    measurements: &ArrayView2<f64>,
    core: &ArrayView3<f64>,
) -> Result<Array2<f64>> {
    let unfolded = unfold_left(core)?;
    Ok(face_splitting(left, measurements).dot(&unfolded))
}

/// Push a core onto a right data stack: `Σ_{e,r} C[l, e, r] E[n, e] R[n, r]`
pub fn right_data_step(
    core: &ArrayView3<f64>,
    measurements: &ArrayView2<f64>,
    right: &ArrayView2<f64>,
) -> Result<Array2<f64>> {
    let unfolded = unfold_right(core)?;
    Ok(face_splitting(measurements, right).dot(&unfolded.t()))
}

/// Prediction of the train at every sample from the stacks around the core
pub fn predict(
    left: &ArrayView2<f64>,
    measurements: &ArrayView2<f64>,
    core: &ArrayView3<f64>,
    right: &ArrayView2<f64>,
) -> Result<Array1<f64>> {
    let partial = left_data_step(left, measurements, core)?;
    Ok((&partial * right).sum_axis(Axis(1)))
}

/// Design columns of one block, ordered `(l*e + e')*r + r'` like the block's coefficients
pub fn design_block(
    left: &ArrayView2<f64>,
    measurements: &ArrayView2<f64>,
    right: &ArrayView2<f64>,
    block: &Block,
) -> Array2<f64> {
    let l = left.slice(s![.., block.range(0)]);
    let e = measurements.slice(s![.., block.range(1)]);
    let r = right.slice(s![.., block.range(2)]);
    face_splitting(&face_splitting(&l, &e).view(), &r)
}

/// Local design matrix: block design columns side by side, in block order
pub fn design_matrix(
    left: &ArrayView2<f64>,
    measurements: &ArrayView2<f64>,
    right: &ArrayView2<f64>,
    blocks: &[Block],
) -> Array2<f64> {
    let samples = left.nrows();
    let dofs = BlockSparseTensor::dofs(blocks);
    let mut op = Array2::<f64>::zeros((samples, dofs));
    let mut offset = 0;
    for block in blocks {
        let cols = design_block(left, measurements, right, block);
        let width = cols.ncols();
        op.slice_mut(s![.., offset..offset + width])
            .assign(&cols);
        offset += width;
    }
    op
}

/// Relative error `‖prediction - values‖ / ‖values‖`
///
/// Zero targets give the absolute error instead.
pub fn relative_error<'a>(
    prediction: impl IntoIterator<Item = &'a f64>,
    values: impl IntoIterator<Item = &'a f64>,
) -> f64 {
    let (mut err, mut norm) = (0.0, 0.0);
    for (p, v) in prediction.into_iter().zip(values) {
        err += (p - v) * (p - v);
        norm += v * v;
    }
    if norm > 0.0 {
        (err / norm).sqrt()
    } else {
        err.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray_ext::{array, Array3};

    fn core() -> Array3<f64> {
        Array3::from_shape_fn((2, 2, 3), |(l, e, r)| (l * 6 + e * 3 + r) as f64 * 0.1 - 0.4)
    }

    #[test]
    fn test_data_steps_agree_with_prediction() {
        let c = core();
        let left = array![[1.0, 0.5], [-1.0, 2.0]];
        let meas = array![[1.0, 0.0], [0.3, 0.7]];
        let right = array![[1.0, 0.0, 2.0], [0.5, 0.5, 0.5]];

        let pred = predict(&left.view(), &meas.view(), &c.view(), &right.view()).unwrap();
        let via_right = right_data_step(&c.view(), &meas.view(), &right.view()).unwrap();
        for n in 0..2 {
            let expected: f64 = (0..2).map(|l| left[[n, l]] * via_right[[n, l]]).sum();
            assert!((pred[n] - expected).abs() < 1e-12);

            let mut direct = 0.0;
            for ((l, e, r), v) in c.indexed_iter() {
                direct += left[[n, l]] * meas[[n, e]] * v * right[[n, r]];
            }
            assert!((pred[n] - direct).abs() < 1e-12);
        }
    }

    #[test]
    fn test_design_matrix_reproduces_prediction() {
        let c = core();
        let blocks = vec![
            Block::from([0..1, 0..2, 0..3]),
            Block::from([1..2, 0..2, 0..3]),
        ];
        let left = array![[1.0, 0.5], [-1.0, 2.0], [0.2, 0.1]];
        let meas = array![[1.0, 0.0], [0.3, 0.7], [0.5, -0.5]];
        let right = array![[1.0, 0.0, 2.0], [0.5, 0.5, 0.5], [0.0, 1.0, 0.0]];

        let op = design_matrix(&left.view(), &meas.view(), &right.view(), &blocks);
        let coeffs = BlockSparseTensor::coefficients(&c.clone().into_dyn().view(), &blocks).unwrap();
        let pred = predict(&left.view(), &meas.view(), &c.view(), &right.view()).unwrap();
        let via_op = op.dot(&coeffs);
        for (a, b) in pred.iter().zip(via_op.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_relative_error() {
        let pred = [1.0, 2.0];
        let values = [1.0, 0.0];
        assert!((relative_error(&pred, &values) - 2.0).abs() < 1e-12);
        assert_eq!(relative_error(&[0.0], &[0.0]), 0.0);
    }
}
