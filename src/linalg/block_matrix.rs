//! Block-structured sparse matrix with lazily materialised dense blocks.
//!
//! The matrix is a grid of `block_rows x block_cols` cells. Each cell is either
//! absent (implicitly zero, no storage) or materialised: a zero-initialised
//! `BR x BC` block stored in a growable arena. A flat row-major index maps every
//! cell to its arena slot, so materialisation and lookup are O(1).
//!
//! Multi-entity problems (many camera poses sharing observations) use a square
//! `SparseBlockMatrix<N, N>` as Hessian, with one block row/column per entity.

use super::{LinAlgError, LinAlgResult, SparseMatrix};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, SMatrix};

/// Dense `BR x BC` block type stored by [`SparseBlockMatrix`].
pub type Block<const BR: usize, const BC: usize> = SMatrix<f64, BR, BC>;

#[derive(Debug, Clone)]
pub struct SparseBlockMatrix<const BR: usize, const BC: usize> {
    block_rows: usize,
    block_cols: usize,
    /// Row-major cell index into `blocks`
    index: Vec<Option<usize>>,
    blocks: Vec<Block<BR, BC>>,
    /// Cell coordinates of each arena slot, in materialisation order
    coords: Vec<(usize, usize)>,
}

impl<const BR: usize, const BC: usize> Default for SparseBlockMatrix<BR, BC> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BR: usize, const BC: usize> SparseBlockMatrix<BR, BC> {
    /// Create an unsized matrix. Call [`resize`](Self::resize) before use.
    pub fn new() -> Self {
        Self {
            block_rows: 0,
            block_cols: 0,
            index: Vec::new(),
            blocks: Vec::new(),
            coords: Vec::new(),
        }
    }

    /// Create a matrix with a `block_rows x block_cols` grid of absent blocks.
    pub fn with_dimensions(block_rows: usize, block_cols: usize) -> LinAlgResult<Self> {
        let mut matrix = Self::new();
        matrix.resize(block_rows, block_cols)?;
        Ok(matrix)
    }

    /// Reset the grid to `block_rows x block_cols` with no materialised blocks.
    ///
    /// Same dimensions keep the index allocation and only clear it; different
    /// dimensions reallocate the index.
    pub fn resize(&mut self, block_rows: usize, block_cols: usize) -> LinAlgResult<()> {
        if block_rows == 0 || block_cols == 0 || block_rows.checked_mul(block_cols).is_none() {
            return Err(LinAlgError::InvalidDimensions {
                rows: block_rows,
                cols: block_cols,
            }
            .log());
        }

        if block_rows == self.block_rows && block_cols == self.block_cols {
            self.index.fill(None);
        } else {
            self.block_rows = block_rows;
            self.block_cols = block_cols;
            self.index = vec![None; block_rows * block_cols];
        }
        self.blocks.clear();
        self.coords.clear();
        Ok(())
    }

    /// Pre-allocate arena space for `additional` blocks.
    pub fn reserve(&mut self, additional: usize) {
        self.blocks.reserve(additional);
        self.coords.reserve(additional);
    }

    fn cell(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.block_rows && col < self.block_cols).then(|| row * self.block_cols + col)
    }

    fn checked_cell(&self, row: usize, col: usize) -> LinAlgResult<usize> {
        self.cell(row, col).ok_or_else(|| {
            LinAlgError::BlockOutOfRange {
                row,
                col,
                rows: self.block_rows,
                cols: self.block_cols,
            }
            .log()
        })
    }

    /// True if `block(row, col)` was called since the last resize.
    pub fn contains_block(&self, row: usize, col: usize) -> bool {
        self.cell(row, col)
            .is_some_and(|cell| self.index[cell].is_some())
    }

    /// Mutable access to block `(row, col)`, materialising a zero block on first access.
    ///
    /// Repeated calls return the same block until the next resize.
    pub fn block(&mut self, row: usize, col: usize) -> LinAlgResult<&mut Block<BR, BC>> {
        let cell = self.checked_cell(row, col)?;
        let slot = match self.index[cell] {
            Some(slot) => slot,
            None => {
                let slot = self.blocks.len();
                self.blocks.push(Block::<BR, BC>::zeros());
                self.coords.push((row, col));
                self.index[cell] = Some(slot);
                slot
            }
        };
        Ok(&mut self.blocks[slot])
    }

    /// Read-only lookup that never materialises a block.
    pub fn get(&self, row: usize, col: usize) -> Option<&Block<BR, BC>> {
        let slot = self.index[self.cell(row, col)?]?;
        self.blocks.get(slot)
    }

    /// Number of materialised blocks
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of block rows
    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    /// Number of block columns
    pub fn block_cols(&self) -> usize {
        self.block_cols
    }

    /// Number of scalar rows (`block_rows * BR`)
    pub fn nrows(&self) -> usize {
        self.block_rows * BR
    }

    /// Number of scalar columns (`block_cols * BC`)
    pub fn ncols(&self) -> usize {
        self.block_cols * BC
    }

    /// Materialised blocks as `(row, col, block)`, in materialisation order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Block<BR, BC>)> {
        self.coords
            .iter()
            .zip(self.blocks.iter())
            .map(|(&(row, col), block)| (row, col, block))
    }

    /// Dense copy with absent blocks as zeros.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols());
        for (row, col, block) in self.iter() {
            dense
                .fixed_view_mut::<BR, BC>(row * BR, col * BC)
                .copy_from(block);
        }
        dense
    }
}

impl<const N: usize> SparseBlockMatrix<N, N> {
    /// Scalar sparse matrix of the symmetric system this block matrix describes.
    ///
    /// Stored blocks are emitted as-is. An off-diagonal block whose mirrored
    /// cell is absent is also emitted transposed at the mirrored position, so a
    /// matrix filled only above the diagonal yields the full symmetric matrix.
    pub fn to_sparse_symmetric(&self) -> LinAlgResult<SparseMatrix> {
        let mut triplets = Vec::with_capacity(2 * self.num_blocks() * N * N);
        for (row, col, block) in self.iter() {
            let mirrored = row != col && !self.contains_block(col, row);
            for i in 0..N {
                for j in 0..N {
                    let value = block[(i, j)];
                    triplets.push(Triplet::new(row * N + i, col * N + j, value));
                    if mirrored {
                        triplets.push(Triplet::new(col * N + j, row * N + i, value));
                    }
                }
            }
        }

        SparseColMat::try_new_from_triplets(self.nrows(), self.ncols(), &triplets).map_err(|e| {
            LinAlgError::SparseAssembly("failed to assemble block Hessian".to_string())
                .log_with_source(e)
        })
    }
}
