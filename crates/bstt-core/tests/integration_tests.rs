//! Integration tests for block-sparse trains
//!
//! Exercise the public collaborator API the way the solvers do: sweeps of
//! core moves, component replacement and rank increases.

use bstt_core::{
    Block, BlockSparseTT, BlockSparseTTSystem2, BlockSparseTensor, BlockSparseTrain, CoreError,
    Direction, SharedWeightSystem,
};
use scirs2_core::ndarray_ext::{array, Array1, Array2, ArrayD, IxDyn};

fn degree_blocks(order: usize, dim: usize) -> Vec<Vec<Block>> {
    let max_deg = dim - 1;
    (0..order)
        .map(|p| {
            let left_max = if p == 0 { 0 } else { max_deg };
            let mut blocks = Vec::new();
            for l in 0..=left_max {
                for e in 0..dim {
                    let r = l + e;
                    let last = p == order - 1;
                    if r > max_deg || (last && r != max_deg) {
                        continue;
                    }
                    let right = if last { 0..1 } else { r..r + 1 };
                    blocks.push(Block::from([l..l + 1, e..e + 1, right]));
                }
            }
            blocks
        })
        .collect()
}

fn measurements(order: usize, samples: usize, dim: usize) -> Vec<Array2<f64>> {
    (0..order)
        .map(|m| {
            Array2::from_shape_fn((samples, dim), |(n, j)| {
                let x = ((n * 7 + m * 3) % 11) as f64 / 5.5 - 1.0;
                x.powi(j as i32)
            })
        })
        .collect()
}

#[test]
fn test_full_sweep_keeps_evaluation() {
    let mut tt = BlockSparseTT::random(&[3, 3, 3, 3], degree_blocks(4, 3), 2024).unwrap();
    let meas = measurements(4, 12, 3);
    let before = tt.evaluate(&meas).unwrap();

    while tt.core_position() < tt.order() - 1 {
        tt.move_core(Direction::Right).unwrap();
    }
    while tt.core_position() > 0 {
        tt.move_core(Direction::Left).unwrap();
    }

    let after = tt.evaluate(&meas).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_set_component_rejects_out_of_block_entries() {
    let mut tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 1).unwrap();
    let mut core = tt.component(1).clone();
    // (l=2, e=2) has total degree 4, outside every block
    core[IxDyn(&[2, 2, 0])] = 1.0;
    assert!(matches!(
        tt.set_component(1, core),
        Err(CoreError::InvalidBlocks { .. })
    ));
}

#[test]
fn test_set_component_accepts_block_dense() {
    let mut tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 1).unwrap();
    let blocks = tt.blocks(1).to_vec();
    let coeffs = Array1::from_elem(BlockSparseTensor::dofs(&blocks), 0.5);
    let dense = BlockSparseTensor::to_dense(&coeffs.view(), &blocks, tt.component(1).shape()).unwrap();
    tt.set_component(1, dense.clone()).unwrap();
    assert_eq!(tt.component(1), &dense);
}

#[test]
fn test_increase_block_keeps_left_orthonormality() {
    // Bond 0|1 slice 1 has room for a second index: rows (0, 1) and (0, 2)
    let blocks = vec![
        vec![Block::from([0..1, 0..1, 0..1]), Block::from([0..1, 1..3, 1..2])],
        vec![Block::from([0..1, 0..2, 0..1]), Block::from([1..2, 0..2, 0..1])],
    ];
    let mut tt = BlockSparseTT::random(&[3, 2], blocks, 5).unwrap();
    tt.move_core(Direction::Right).unwrap();
    assert_eq!(tt.max_size(1, 0, 3), 2);

    let old = tt.component(0).clone();
    // Orthogonal complement of the current slice column within rows (0,1), (0,2)
    let (a, b) = (old[IxDyn(&[0, 1, 1])], old[IxDyn(&[0, 2, 1])]);
    let vector: ArrayD<f64> = array![[0.0, -b, a]].into_dyn();
    let padding = ArrayD::<f64>::zeros(IxDyn(&[2, 1]));
    tt.increase_block(1, vector.view(), padding.view(), Direction::Left)
        .unwrap();

    let core = tt.component(0);
    assert_eq!(core.shape(), &[1, 3, 3]);
    let mat = core.to_shape((3, 3)).unwrap();
    let gram = mat.t().dot(&mat);
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((gram[[i, j]] - expected).abs() < 1e-10);
        }
    }
    assert_eq!(tt.unique_slices(0), vec![0..1, 1..3]);
}

#[test]
fn test_shared_pool_sweep_verifies() {
    let trains = vec![
        BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 10).unwrap(),
        BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), 11).unwrap(),
    ];
    let mut sys = BlockSparseTTSystem2::new(trains, array![[0, 0, 1], [1, 1, 0]]).unwrap();
    let meas = measurements(3, 6, 3);
    let before = sys.evaluate(&meas).unwrap();

    sys.move_core(Direction::Right).unwrap();
    sys.move_core(Direction::Right).unwrap();
    sys.verify().unwrap();
    assert!(sys.move_core(Direction::Right).is_err());

    let after = sys.evaluate(&meas).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}
