//! Component storage shared by the reference trains
//!
//! Holds the dense components, their block descriptors and the core position,
//! and implements the structural operations: validation of bond slices,
//! slice-wise orthogonalizing core moves and rank increases.
//!
//! A bond between components `p` and `p+1` is partitioned into contiguous
//! slices. Every block of component `p` has a slice as its right range, and
//! every block of component `p+1` has one as its left range. Moves factorize
//! each slice on its own, so block sparsity survives orthogonalization.
//!
//! # SciRS2 Integration
//!
//! SVDs use `scirs2_linalg::svd`.

use std::collections::BTreeSet;
use std::ops::Range;

use scirs2_core::ndarray_ext::{s, Array1, Array2, ArrayD, ArrayViewD, IxDyn};
use scirs2_linalg::svd;

use crate::block::{block_mask, blocks_overlap, Block};
use crate::direction::Direction;
use crate::error::{CoreError, Result};

/// Reshape a component into a matrix, rows over the leading axes
pub(crate) fn matricize(a: &ArrayD<f64>, rows: usize, cols: usize) -> Result<Array2<f64>> {
    a.as_standard_layout()
        .into_owned()
        .into_shape_with_order((rows, cols))
        .map_err(|e| CoreError::ShapeMismatch(e.to_string()))
}

/// Reshape a matrix back into a component of the given shape
pub(crate) fn tensorize(m: Array2<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    m.as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(shape))
        .map_err(|e| CoreError::ShapeMismatch(e.to_string()))
}

fn flat_index(index: &[usize], shape: &[usize]) -> usize {
    index
        .iter()
        .zip(shape)
        .fold(0, |acc, (&i, &n)| acc * n + i)
}

fn is_partition(slices: &[Range<usize>], rank: usize) -> bool {
    let mut expected = 0;
    for slice in slices {
        if slice.start != expected || slice.is_empty() {
            return false;
        }
        expected = slice.end;
    }
    expected == rank
}

fn shift_range(range: &Range<usize>, slice: &Range<usize>) -> Range<usize> {
    if range.start >= slice.end {
        range.start + 1..range.end + 1
    } else if range == slice {
        range.start..range.end + 1
    } else {
        range.clone()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrainStorage {
    pub(crate) components: Vec<ArrayD<f64>>,
    pub(crate) blocks: Vec<Vec<Block>>,
    pub(crate) dimensions: Vec<usize>,
    pub(crate) core_position: usize,
    ndim: usize,
}

impl TrainStorage {
    pub(crate) fn new(
        components: Vec<ArrayD<f64>>,
        blocks: Vec<Vec<Block>>,
        core_position: usize,
        ndim: usize,
    ) -> Result<Self> {
        let dimensions = components
            .iter()
            .map(|c| if c.ndim() > 1 { c.shape()[1] } else { 0 })
            .collect();
        let storage = Self {
            components: components
                .into_iter()
                .map(|c| c.as_standard_layout().into_owned())
                .collect(),
            blocks,
            dimensions,
            core_position,
            ndim,
        };
        storage.validate()?;
        Ok(storage)
    }

    pub(crate) fn order(&self) -> usize {
        self.components.len()
    }

    /// Rank of bond `bond|bond+1`
    pub(crate) fn bond_rank(&self, bond: usize) -> usize {
        self.components[bond].shape()[self.ndim - 1]
    }

    fn validate(&self) -> Result<()> {
        let order = self.order();
        let nd = self.ndim;
        if order == 0 {
            return Err(CoreError::ShapeMismatch(
                "a train needs at least one component".to_string(),
            ));
        }
        if self.blocks.len() != order {
            return Err(CoreError::ShapeMismatch(format!(
                "{} components but {} block lists",
                order,
                self.blocks.len()
            )));
        }
        if self.core_position >= order {
            return Err(CoreError::InvalidPosition {
                position: self.core_position,
                order,
            });
        }

        for (p, core) in self.components.iter().enumerate() {
            let shape = core.shape();
            if shape.len() != nd {
                return Err(CoreError::ShapeMismatch(format!(
                    "component {} has {} axes, expected {}",
                    p,
                    shape.len(),
                    nd
                )));
            }
            if p == 0 && shape[0] != 1 {
                return Err(CoreError::ShapeMismatch(format!(
                    "first component must have left rank 1, got {}",
                    shape[0]
                )));
            }
            if p == order - 1 && shape[nd - 1] != 1 {
                return Err(CoreError::ShapeMismatch(format!(
                    "last component must have right rank 1, got {}",
                    shape[nd - 1]
                )));
            }
            if p > 0 && shape[0] != self.bond_rank(p - 1) {
                return Err(CoreError::ShapeMismatch(format!(
                    "bond {}|{} has rank {} on the left and {} on the right",
                    p - 1,
                    p,
                    self.bond_rank(p - 1),
                    shape[0]
                )));
            }

            let blocks = &self.blocks[p];
            if blocks.is_empty() {
                return Err(CoreError::InvalidBlocks {
                    position: p,
                    message: "component has no blocks".to_string(),
                });
            }
            for block in blocks {
                if !block.fits(shape) || block.is_empty() {
                    return Err(CoreError::InvalidBlocks {
                        position: p,
                        message: format!(
                            "block {:?} is empty or does not fit shape {:?}",
                            block.ranges(),
                            shape
                        ),
                    });
                }
            }
            if blocks_overlap(blocks) {
                return Err(CoreError::InvalidBlocks {
                    position: p,
                    message: "blocks overlap".to_string(),
                });
            }
            let mask = block_mask(blocks, shape);
            if core.iter().zip(mask.iter()).any(|(v, m)| !m && *v != 0.0) {
                return Err(CoreError::InvalidBlocks {
                    position: p,
                    message: "non-zero entries outside all blocks".to_string(),
                });
            }
        }

        if !is_partition(&self.unique_ranges(0, 0), 1) {
            return Err(CoreError::InvalidBlocks {
                position: 0,
                message: "left ranges of the first component must be 0..1".to_string(),
            });
        }
        if !is_partition(&self.unique_ranges(order - 1, nd - 1), 1) {
            return Err(CoreError::InvalidBlocks {
                position: order - 1,
                message: "right ranges of the last component must be 0..1".to_string(),
            });
        }
        for bond in 0..order - 1 {
            let right = self.unique_ranges(bond, nd - 1);
            let left = self.unique_ranges(bond + 1, 0);
            if right != left {
                return Err(CoreError::InvalidBlocks {
                    position: bond,
                    message: format!(
                        "slices of bond {}|{} differ: {:?} vs {:?}",
                        bond,
                        bond + 1,
                        right,
                        left
                    ),
                });
            }
            if !is_partition(&right, self.bond_rank(bond)) {
                return Err(CoreError::InvalidBlocks {
                    position: bond,
                    message: format!(
                        "slices {:?} do not partition the rank {} of bond {}|{}",
                        right,
                        self.bond_rank(bond),
                        bond,
                        bond + 1
                    ),
                });
            }
        }
        Ok(())
    }

    /// Distinct ranges along `axis` over the blocks of `position`, sorted
    pub(crate) fn unique_ranges(&self, position: usize, axis: usize) -> Vec<Range<usize>> {
        let set: BTreeSet<(usize, usize)> = self.blocks[position]
            .iter()
            .map(|b| {
                let r = b.range(axis);
                (r.start, r.end)
            })
            .collect();
        set.into_iter().map(|(a, b)| a..b).collect()
    }

    /// Slices of bond `bond|bond+1`
    pub(crate) fn bond_slices(&self, bond: usize) -> Vec<Range<usize>> {
        self.unique_ranges(bond, self.ndim - 1)
    }

    pub(crate) fn blocks_of_slice(
        &self,
        position: usize,
        slice: &Range<usize>,
        axis: usize,
    ) -> Vec<Block> {
        self.blocks[position]
            .iter()
            .filter(|b| b.range(axis) == *slice)
            .cloned()
            .collect()
    }

    /// Flat row indices (over all but the last axis) feeding right slice `slice`
    fn rows_of_right_slice(&self, position: usize, slice: &Range<usize>) -> Vec<usize> {
        let shape = self.components[position].shape();
        let lead = &shape[..self.ndim - 1];
        let mut rows = BTreeSet::new();
        for block in self.blocks_of_slice(position, slice, self.ndim - 1) {
            let sub = Block::new(block.ranges()[..self.ndim - 1].to_vec());
            for idx in sub.indices() {
                rows.insert(flat_index(&idx, lead));
            }
        }
        rows.into_iter().collect()
    }

    /// Flat column indices (over all but the first axis) fed by left slice `slice`
    fn cols_of_left_slice(&self, position: usize, slice: &Range<usize>) -> Vec<usize> {
        let shape = self.components[position].shape();
        let trail = &shape[1..];
        let mut cols = BTreeSet::new();
        for block in self.blocks_of_slice(position, slice, 0) {
            let sub = Block::new(block.ranges()[1..].to_vec());
            for idx in sub.indices() {
                cols.insert(flat_index(&idx, trail));
            }
        }
        cols.into_iter().collect()
    }

    pub(crate) fn set_component(&mut self, position: usize, core: ArrayD<f64>) -> Result<()> {
        let order = self.order();
        let current = self
            .components
            .get(position)
            .ok_or(CoreError::InvalidPosition { position, order })?;
        if current.shape() != core.shape() {
            return Err(CoreError::ShapeMismatch(format!(
                "component {} has shape {:?}, replacement has {:?}",
                position,
                current.shape(),
                core.shape()
            )));
        }
        let mask = block_mask(&self.blocks[position], core.shape());
        if core.iter().zip(mask.iter()).any(|(v, m)| !m && *v != 0.0) {
            return Err(CoreError::InvalidBlocks {
                position,
                message: "replacement has non-zero entries outside all blocks".to_string(),
            });
        }
        self.components[position] = core.as_standard_layout().into_owned();
        Ok(())
    }

    pub(crate) fn move_core(&mut self, direction: Direction) -> Result<Array1<f64>> {
        let order = self.order();
        let position = self.core_position;
        let out_of_range = CoreError::CoreOutOfRange {
            direction,
            position,
            order,
        };
        match direction {
            Direction::Right => {
                if position + 1 >= order {
                    return Err(out_of_range);
                }
                let sv = self.orthogonalize_right(position)?;
                self.core_position += 1;
                Ok(sv)
            }
            Direction::Left => {
                if position == 0 {
                    return Err(out_of_range);
                }
                let sv = self.orthogonalize_left(position)?;
                self.core_position -= 1;
                Ok(sv)
            }
        }
    }

    /// Left-orthogonalize component `p` slice by slice, pushing `S Vᵀ` into `p+1`
    fn orthogonalize_right(&mut self, p: usize) -> Result<Array1<f64>> {
        let shape = self.components[p].shape().to_vec();
        let next_shape = self.components[p + 1].shape().to_vec();
        let rank = shape[self.ndim - 1];
        let rows_total: usize = shape[..self.ndim - 1].iter().product();
        let cols_next: usize = next_shape[1..].iter().product();

        let mut mat = matricize(&self.components[p], rows_total, rank)?;
        let mut next = matricize(&self.components[p + 1], rank, cols_next)?;
        let mut singular = Array1::<f64>::zeros(rank);

        for slice in self.bond_slices(p) {
            let rows = self.rows_of_right_slice(p, &slice);
            let k = slice.len();
            if rows.len() < k {
                return Err(CoreError::InvalidBlocks {
                    position: p,
                    message: format!(
                        "slice {:?} has {} rows, fewer than its size {}",
                        slice,
                        rows.len(),
                        k
                    ),
                });
            }

            let sub = Array2::from_shape_fn((rows.len(), k), |(i, j)| {
                mat[[rows[i], slice.start + j]]
            });
            let (u, sigma, vt) = svd(&sub.view(), false, None)?;

            for (i, &row) in rows.iter().enumerate() {
                for j in 0..k {
                    mat[[row, slice.start + j]] = u[[i, j]];
                }
            }

            let mut svt = vt.slice(s![..k, ..k]).to_owned();
            for (i, mut row) in svt.rows_mut().into_iter().enumerate() {
                row *= sigma[i];
            }
            let updated = svt.dot(&next.slice(s![slice.start..slice.end, ..]));
            next.slice_mut(s![slice.start..slice.end, ..]).assign(&updated);

            for j in 0..k {
                singular[slice.start + j] = sigma[j];
            }
        }

        self.components[p] = tensorize(mat, &shape)?;
        self.components[p + 1] = tensorize(next, &next_shape)?;
        Ok(singular)
    }

    /// Right-orthogonalize component `p` slice by slice, pushing `U S` into `p-1`
    fn orthogonalize_left(&mut self, p: usize) -> Result<Array1<f64>> {
        let shape = self.components[p].shape().to_vec();
        let prev_shape = self.components[p - 1].shape().to_vec();
        let rank = shape[0];
        let cols_total: usize = shape[1..].iter().product();
        let rows_prev: usize = prev_shape[..self.ndim - 1].iter().product();

        let mut mat = matricize(&self.components[p], rank, cols_total)?;
        let mut prev = matricize(&self.components[p - 1], rows_prev, rank)?;
        let mut singular = Array1::<f64>::zeros(rank);

        for slice in self.bond_slices(p - 1) {
            let cols = self.cols_of_left_slice(p, &slice);
            let k = slice.len();
            if cols.len() < k {
                return Err(CoreError::InvalidBlocks {
                    position: p,
                    message: format!(
                        "slice {:?} has {} columns, fewer than its size {}",
                        slice,
                        cols.len(),
                        k
                    ),
                });
            }

            let sub = Array2::from_shape_fn((k, cols.len()), |(i, j)| {
                mat[[slice.start + i, cols[j]]]
            });
            let (u, sigma, vt) = svd(&sub.view(), false, None)?;

            for i in 0..k {
                for (j, &col) in cols.iter().enumerate() {
                    mat[[slice.start + i, col]] = vt[[i, j]];
                }
            }

            let mut us = u.slice(s![..k, ..k]).to_owned();
            for (j, mut col) in us.columns_mut().into_iter().enumerate() {
                col *= sigma[j];
            }
            let updated = prev.slice(s![.., slice.start..slice.end]).dot(&us);
            prev.slice_mut(s![.., slice.start..slice.end]).assign(&updated);

            for j in 0..k {
                singular[slice.start + j] = sigma[j];
            }
        }

        self.components[p] = tensorize(mat, &shape)?;
        self.components[p - 1] = tensorize(prev, &prev_shape)?;
        Ok(singular)
    }

    pub(crate) fn max_size(&self, slice_index: usize, position: usize, cap: usize) -> usize {
        if position >= self.order() {
            return 0;
        }
        let slices = self.bond_slices(position);
        let Some(slice) = slices.get(slice_index) else {
            return 0;
        };
        let rows = self.rows_of_right_slice(position, slice).len();
        let cols = if position + 1 < self.order() {
            self.cols_of_left_slice(position + 1, slice).len()
        } else {
            rows
        };
        cap.min(rows).min(cols)
    }

    pub(crate) fn increase_block(
        &mut self,
        slice_index: usize,
        vector: ArrayViewD<f64>,
        padding: ArrayViewD<f64>,
        direction: Direction,
    ) -> Result<()> {
        let order = self.order();
        let position = self.core_position;
        let bond = match direction {
            Direction::Left if position > 0 => position - 1,
            Direction::Right if position + 1 < order => position,
            _ => {
                return Err(CoreError::CoreOutOfRange {
                    direction,
                    position,
                    order,
                })
            }
        };
        let slices = self.bond_slices(bond);
        let slice = slices
            .get(slice_index)
            .cloned()
            .ok_or_else(|| CoreError::InvalidBlocks {
                position: bond,
                message: format!("bond has {} slices, got index {}", slices.len(), slice_index),
            })?;

        let (column_fill, row_fill) = match direction {
            Direction::Left => (vector, padding),
            Direction::Right => (padding, vector),
        };

        let left_shape = self.components[bond].shape().to_vec();
        let right_shape = self.components[bond + 1].shape().to_vec();
        let rank = left_shape[self.ndim - 1];
        if column_fill.shape() != &left_shape[..self.ndim - 1] {
            return Err(CoreError::ShapeMismatch(format!(
                "new column of component {} must have shape {:?}, got {:?}",
                bond,
                &left_shape[..self.ndim - 1],
                column_fill.shape()
            )));
        }
        if row_fill.shape() != &right_shape[1..] {
            return Err(CoreError::ShapeMismatch(format!(
                "new row of component {} must have shape {:?}, got {:?}",
                bond + 1,
                &right_shape[1..],
                row_fill.shape()
            )));
        }

        let rows_total: usize = left_shape[..self.ndim - 1].iter().product();
        let cols_total: usize = right_shape[1..].iter().product();
        let allowed_rows: BTreeSet<usize> =
            self.rows_of_right_slice(bond, &slice).into_iter().collect();
        let allowed_cols: BTreeSet<usize> =
            self.cols_of_left_slice(bond + 1, &slice).into_iter().collect();

        let insert = slice.end;
        let left = matricize(&self.components[bond], rows_total, rank)?;
        let right = matricize(&self.components[bond + 1], rank, cols_total)?;

        let column: Vec<f64> = column_fill.iter().cloned().collect();
        let grown_left = Array2::from_shape_fn((rows_total, rank + 1), |(i, j)| {
            if j < insert {
                left[[i, j]]
            } else if j == insert {
                if allowed_rows.contains(&i) {
                    column[i]
                } else {
                    0.0
                }
            } else {
                left[[i, j - 1]]
            }
        });

        let row: Vec<f64> = row_fill.iter().cloned().collect();
        let grown_right = Array2::from_shape_fn((rank + 1, cols_total), |(i, j)| {
            if i < insert {
                right[[i, j]]
            } else if i == insert {
                if allowed_cols.contains(&j) {
                    row[j]
                } else {
                    0.0
                }
            } else {
                right[[i - 1, j]]
            }
        });

        let mut new_left_shape = left_shape;
        new_left_shape[self.ndim - 1] += 1;
        let mut new_right_shape = right_shape;
        new_right_shape[0] += 1;

        self.components[bond] = tensorize(grown_left, &new_left_shape)?;
        self.components[bond + 1] = tensorize(grown_right, &new_right_shape)?;

        let nd = self.ndim;
        for block in self.blocks[bond].iter_mut() {
            *block = block.with_range(nd - 1, shift_range(&block.right(), &slice));
        }
        for block in self.blocks[bond + 1].iter_mut() {
            *block = block.with_range(0, shift_range(&block.left(), &slice));
        }

        tracing::debug!(
            bond,
            slice_index,
            new_size = slice.len() + 1,
            "increased bond slice"
        );
        Ok(())
    }
}
