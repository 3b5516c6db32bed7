//! Block descriptors and block-sparse coefficient layout
//!
//! A [`Block`] marks a hyper-rectangle of structurally non-zero entries inside
//! a core, one index range per axis. The free parameters of a core are the
//! entries of its blocks, laid out block after block, each block in row-major
//! order. [`BlockSparseTensor`] converts between that flat coefficient vector
//! and the dense core.

use std::ops::Range;

use scirs2_core::ndarray_ext::{Array1, ArrayD, ArrayView1, ArrayViewD, IxDyn};

use crate::error::{CoreError, Result};

/// Structurally non-zero sub-block of a core: one index range per axis
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    ranges: Vec<Range<usize>>,
}

impl Block {
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self { ranges }
    }

    pub fn ndim(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Index range along `axis`
    pub fn range(&self, axis: usize) -> Range<usize> {
        self.ranges[axis].clone()
    }

    /// Range along the first (left rank) axis
    pub fn left(&self) -> Range<usize> {
        self.range(0)
    }

    /// Range along the last (right rank) axis
    pub fn right(&self) -> Range<usize> {
        self.range(self.ndim() - 1)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }

    /// Number of free parameters in the block
    pub fn size(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, index: &[usize]) -> bool {
        index.len() == self.ranges.len()
            && index.iter().zip(&self.ranges).all(|(i, r)| r.contains(i))
    }

    /// Whether the block lies inside an array of the given shape
    pub fn fits(&self, shape: &[usize]) -> bool {
        shape.len() == self.ranges.len()
            && self
                .ranges
                .iter()
                .zip(shape)
                .all(|(r, &n)| r.start <= r.end && r.end <= n)
    }

    /// Sub-block made of the given axes, in the given order
    pub fn select(&self, axes: &[usize]) -> Block {
        Block::new(axes.iter().map(|&a| self.range(a)).collect())
    }

    /// Copy with the range along `axis` replaced
    pub fn with_range(&self, axis: usize, range: Range<usize>) -> Block {
        let mut ranges = self.ranges.clone();
        ranges[axis] = range;
        Block::new(ranges)
    }

    /// Multi-indices of the block in row-major order
    pub fn indices(&self) -> BlockIndices<'_> {
        BlockIndices {
            block: self,
            current: self.ranges.iter().map(|r| r.start).collect(),
            done: self.is_empty(),
        }
    }
}

impl From<Vec<Range<usize>>> for Block {
    fn from(ranges: Vec<Range<usize>>) -> Self {
        Block::new(ranges)
    }
}

impl<const N: usize> From<[Range<usize>; N]> for Block {
    fn from(ranges: [Range<usize>; N]) -> Self {
        Block::new(ranges.to_vec())
    }
}

/// Row-major iterator over the multi-indices of a block
pub struct BlockIndices<'a> {
    block: &'a Block,
    current: Vec<usize>,
    done: bool,
}

impl Iterator for BlockIndices<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.current.clone();

        let mut axis = self.current.len();
        loop {
            if axis == 0 {
                self.done = true;
                break;
            }
            axis -= 1;
            self.current[axis] += 1;
            if self.current[axis] < self.block.ranges[axis].end {
                break;
            }
            self.current[axis] = self.block.ranges[axis].start;
        }

        Some(item)
    }
}

/// Block-sparse view of a dense core: coefficients plus block descriptors
#[derive(Debug, Clone)]
pub struct BlockSparseTensor {
    coefficients: Array1<f64>,
    blocks: Vec<Block>,
    shape: Vec<usize>,
}

impl BlockSparseTensor {
    /// Pair a coefficient vector with its blocks and the dense shape
    pub fn new(coefficients: Array1<f64>, blocks: Vec<Block>, shape: Vec<usize>) -> Result<Self> {
        check_blocks(&blocks, &shape)?;
        let expected = Self::dofs(&blocks);
        if coefficients.len() != expected {
            return Err(CoreError::CoefficientCount {
                expected,
                got: coefficients.len(),
            });
        }
        Ok(Self {
            coefficients,
            blocks,
            shape,
        })
    }

    /// Extract the block coefficients of a dense core
    pub fn from_dense(dense: &ArrayViewD<f64>, blocks: Vec<Block>) -> Result<Self> {
        let shape = dense.shape().to_vec();
        let coefficients = Self::coefficients(dense, &blocks)?;
        Ok(Self {
            coefficients,
            blocks,
            shape,
        })
    }

    /// Total number of free parameters over all blocks
    pub fn dofs(blocks: &[Block]) -> usize {
        blocks.iter().map(Block::size).sum()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn coefficient_vector(&self) -> &Array1<f64> {
        &self.coefficients
    }

    /// Dense array with every block filled and zeros elsewhere
    pub fn to_array(&self) -> ArrayD<f64> {
        let mut dense = ArrayD::<f64>::zeros(IxDyn(&self.shape));
        let mut offset = 0;
        for block in &self.blocks {
            for index in block.indices() {
                dense[IxDyn(&index)] = self.coefficients[offset];
                offset += 1;
            }
        }
        dense
    }

    /// Dense array built from a flat coefficient vector
    pub fn to_dense(
        coefficients: &ArrayView1<f64>,
        blocks: &[Block],
        shape: &[usize],
    ) -> Result<ArrayD<f64>> {
        Ok(Self::new(coefficients.to_owned(), blocks.to_vec(), shape.to_vec())?.to_array())
    }

    /// Flat coefficient vector read from the blocks of a dense array
    pub fn coefficients(dense: &ArrayViewD<f64>, blocks: &[Block]) -> Result<Array1<f64>> {
        check_blocks(blocks, dense.shape())?;
        let mut out = Vec::with_capacity(Self::dofs(blocks));
        for block in blocks {
            for index in block.indices() {
                out.push(dense[IxDyn(&index)]);
            }
        }
        Ok(Array1::from_vec(out))
    }
}

fn check_blocks(blocks: &[Block], shape: &[usize]) -> Result<()> {
    for block in blocks {
        if !block.fits(shape) {
            return Err(CoreError::ShapeMismatch(format!(
                "block {:?} does not fit into shape {:?}",
                block.ranges(),
                shape
            )));
        }
    }
    Ok(())
}

/// Boolean mask of entries covered by at least one block
pub fn block_mask(blocks: &[Block], shape: &[usize]) -> ArrayD<bool> {
    let mut mask = ArrayD::from_elem(IxDyn(shape), false);
    for block in blocks {
        for index in block.indices() {
            mask[IxDyn(&index)] = true;
        }
    }
    mask
}

/// Whether any two blocks share an entry
pub fn blocks_overlap(blocks: &[Block]) -> bool {
    blocks.iter().enumerate().any(|(i, a)| {
        blocks[i + 1..].iter().any(|b| {
            a.ranges()
                .iter()
                .zip(b.ranges())
                .all(|(ra, rb)| ra.start < rb.end && rb.start < ra.end)
        })
    })
}
