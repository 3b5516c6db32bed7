//! Property-based tests for the solvers' stack maintenance

use super::*;
use bstt_core::{block_mask, Block, BlockSparseTT, BlockSparseTrain, Direction};
use proptest::prelude::*;
use scirs2_core::ndarray_ext::{Array1, Array2};

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 12,
        ..ProptestConfig::default()
    }
}

/// Degree-limited blocks: slice `k` of every bond carries total degree `k`
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

fn measurements(order: usize, samples: usize, dim: usize, shift: u64) -> Vec<Array2<f64>> {
    (0..order)
        .map(|m| {
            Array2::from_shape_fn((samples, dim), |(n, j)| {
                let x = ((n as u64 * 7 + m as u64 * 3 + shift) % 17) as f64 / 8.5 - 1.0;
                x.powi(j as i32)
            })
        })
        .collect()
}

fn solver(seed: u64) -> AlsRegression<BlockSparseTT> {
    let tt = BlockSparseTT::random(&[3, 3, 3], degree_blocks(3, 3), seed).unwrap();
    let meas = measurements(3, 24, 3, seed);
    let values = Array1::from_shape_fn(24, |n| (n as f64 * 0.3).sin());
    let config = AlsConfig::default().with_method(Method::L2);
    AlsRegression::with_config(tt, meas, values, LocalGramians::identity(&[3, 3, 3]), config).unwrap()
}

/// `R Rᵀ` of a data stack, invariant under orthogonal changes of the bond basis
fn gram(data: &Array2<f64>) -> Array2<f64> {
    data.dot(&data.t())
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Left plus right stack lengths stay at order + 1 through any move sequence
    #[test]
    fn test_stack_lengths_follow_moves(seed in 0u64..500, moves in prop::collection::vec(any::<bool>(), 1..8)) {
        let mut s = solver(seed);
        for right in moves {
            let position = s.core_position();
            let direction = if (right && position < 2) || position == 0 {
                Direction::Right
            } else {
                Direction::Left
            };
            s.update_stacks(direction).unwrap();
            prop_assert!(s.stacks().check_len(3));
            prop_assert_eq!(s.stacks().left_len(), s.core_position() + 1);
            prop_assert!(s.stacks().is_valid());
        }
    }

    /// Moving right and back leaves the residual and the right stack's Gram matrix unchanged
    #[test]
    fn test_move_round_trip(seed in 0u64..500) {
        let mut s = solver(seed);
        let residual = s.residual().unwrap();
        let right = gram(&s.stacks().right_top().unwrap().data);

        s.update_stacks(Direction::Right).unwrap();
        s.update_stacks(Direction::Left).unwrap();

        prop_assert!((s.residual().unwrap() - residual).abs() < 1e-9);
        let after = gram(&s.stacks().right_top().unwrap().data);
        for (a, b) in right.iter().zip(after.iter()) {
            prop_assert!((a - b).abs() < 1e-8);
        }
    }

    /// Microsteps never write outside the declared blocks
    #[test]
    fn test_microsteps_preserve_block_sparsity(seed in 0u64..500) {
        let mut s = solver(seed);
        for _ in 0..2 {
            s.microstep(Direction::Right).unwrap();
            s.update_stacks(Direction::Right).unwrap();
        }
        s.microstep(Direction::Left).unwrap();
        for p in 0..3 {
            let component = s.train().component(p);
            let mask = block_mask(s.train().blocks(p), component.shape());
            for (v, m) in component.iter().zip(mask.iter()) {
                prop_assert!(*m || *v == 0.0);
            }
        }
    }

    /// An l2 microstep never increases the residual
    #[test]
    fn test_l2_microstep_is_monotone(seed in 0u64..500) {
        let mut s = solver(seed);
        let before = s.residual().unwrap();
        s.microstep(Direction::Right).unwrap();
        prop_assert!(s.residual().unwrap() <= before + 1e-10);
    }
}
