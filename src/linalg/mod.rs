//! Linear algebra for the normal equations.
//!
//! This module provides the storage and solvers the Gauss-Newton driver works with:
//! - [`SparseBlockMatrix`]: lazily materialised dense blocks addressed by block index
//! - Dense SPD solves using nalgebra's Cholesky
//! - Block-sparse SPD solves using faer's sparse Cholesky (LLT)
//! - The [`NormalEquations`] trait tying a Hessian type to its gradient vector

use crate::error::ErrorKind;
use thiserror::Error;
use tracing::error;

pub mod block_matrix;
pub mod cholesky;

pub use block_matrix::SparseBlockMatrix;
pub use cholesky::{SparseCholeskySolver, solve_dense_spd};

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Block matrix resized to an empty grid
    #[error("Invalid block matrix dimensions: {rows} x {cols} blocks")]
    InvalidDimensions { rows: usize, cols: usize },

    /// Block access outside of `[0, rows) x [0, cols)`
    #[error("Block ({row}, {col}) is outside of the {rows} x {cols} block grid")]
    BlockOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// Operand sizes that do not agree
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cholesky failed (matrix not symmetric positive definite or singular)
    #[error("Cholesky factorization failed: {0}")]
    FactorizationFailed(String),

    /// faer could not assemble the sparse matrix
    #[error("Sparse matrix assembly failed: {0}")]
    SparseAssembly(String),
}

impl LinAlgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinAlgError::InvalidDimensions { .. }
            | LinAlgError::BlockOutOfRange { .. }
            | LinAlgError::DimensionMismatch { .. } => ErrorKind::Configuration,
            LinAlgError::FactorizationFailed(_) | LinAlgError::SparseAssembly(_) => {
                ErrorKind::Numerical
            }
        }
    }

    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the underlying library error
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// A symmetric positive definite system `A · delta = b`.
///
/// Implemented for the Hessian representations a measurement model may choose:
/// fixed-size nalgebra matrices for small problems, `DMatrix` for dense problems
/// sized at runtime and square [`SparseBlockMatrix`] for multi-entity problems.
///
/// The caller owns a [`Solver`](Self::Solver) for as long as it keeps solving
/// systems of the same shape, so per-pattern work (the symbolic analysis of a
/// sparse Cholesky) is done once.
pub trait NormalEquations: Sized {
    /// Right-hand side and solution vector type
    type Vector;

    /// Factorization state kept between solves, `()` for dense systems
    type Solver: Default;

    /// Fresh, empty system. Models size and zero it inside `build_ls_system`.
    fn empty() -> (Self, Self::Vector);

    /// Solve `self · delta = b` with a Cholesky factorization.
    fn solve_spd(
        &self,
        solver: &mut Self::Solver,
        b: &Self::Vector,
    ) -> LinAlgResult<Self::Vector>;

    /// Euclidean norm of a right-hand side or update vector.
    fn vector_norm(v: &Self::Vector) -> f64;
}
