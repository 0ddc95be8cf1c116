use faer::Mat;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use nalgebra::{Cholesky, DMatrix, DVector, SMatrix, SVector};
use tracing::debug;

use super::{LinAlgError, LinAlgResult, NormalEquations, SparseBlockMatrix, SparseMatrix};

fn ensure_finite<'a>(mut values: impl Iterator<Item = &'a f64>) -> LinAlgResult<()> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(LinAlgError::FactorizationFailed(
            "solution contains non-finite values".to_string(),
        )
        .log())
    }
}

/// Solve a dense symmetric positive definite system with nalgebra's Cholesky.
pub fn solve_dense_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
    if !a.is_square() {
        return Err(LinAlgError::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        }
        .log());
    }
    if a.nrows() != b.len() {
        return Err(LinAlgError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        }
        .log());
    }

    let cholesky = Cholesky::new(a.clone()).ok_or_else(|| {
        LinAlgError::FactorizationFailed(format!(
            "{0} x {0} system is not positive definite",
            a.nrows()
        ))
        .log()
    })?;
    let delta = cholesky.solve(b);
    ensure_finite(delta.iter())?;
    Ok(delta)
}

impl<const N: usize> NormalEquations for SMatrix<f64, N, N> {
    type Vector = SVector<f64, N>;
    type Solver = ();

    fn empty() -> (Self, Self::Vector) {
        (SMatrix::zeros(), SVector::zeros())
    }

    fn solve_spd(&self, _solver: &mut (), b: &Self::Vector) -> LinAlgResult<Self::Vector> {
        let cholesky = Cholesky::new(*self).ok_or_else(|| {
            LinAlgError::FactorizationFailed(format!("{N} x {N} system is not positive definite"))
                .log()
        })?;
        let delta = cholesky.solve(b);
        ensure_finite(delta.iter())?;
        Ok(delta)
    }

    fn vector_norm(v: &Self::Vector) -> f64 {
        v.norm()
    }
}

impl NormalEquations for DMatrix<f64> {
    type Vector = DVector<f64>;
    type Solver = ();

    fn empty() -> (Self, Self::Vector) {
        (DMatrix::zeros(0, 0), DVector::zeros(0))
    }

    fn solve_spd(&self, _solver: &mut (), b: &Self::Vector) -> LinAlgResult<Self::Vector> {
        solve_dense_spd(self, b)
    }

    fn vector_norm(v: &Self::Vector) -> f64 {
        v.norm()
    }
}

impl<const N: usize> NormalEquations for SparseBlockMatrix<N, N> {
    type Vector = DVector<f64>;
    type Solver = SparseCholeskySolver;

    fn empty() -> (Self, Self::Vector) {
        (SparseBlockMatrix::new(), DVector::zeros(0))
    }

    fn solve_spd(
        &self,
        solver: &mut SparseCholeskySolver,
        b: &Self::Vector,
    ) -> LinAlgResult<Self::Vector> {
        if self.block_rows() != self.block_cols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.block_rows(),
                actual: self.block_cols(),
            }
            .log());
        }
        let hessian = self.to_sparse_symmetric()?;
        solver.solve(&hessian, b)
    }

    fn vector_norm(v: &Self::Vector) -> f64 {
        v.norm()
    }
}

/// Sparse LLT solver that reuses its symbolic factorization while the
/// sparsity pattern of the Hessian stays the same.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_pattern: Option<solvers::SymbolicLlt<usize>>,
    pattern_key: Option<(usize, Vec<usize>, Vec<usize>)>,
    symbolic_analyses: usize,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a symbolic factorization has been computed and cached.
    pub fn has_symbolic(&self) -> bool {
        self.symbolic_pattern.is_some()
    }

    /// Number of symbolic factorizations computed so far
    pub fn symbolic_analyses(&self) -> usize {
        self.symbolic_analyses
    }

    fn symbolic_for(&mut self, hessian: &SparseMatrix) -> LinAlgResult<solvers::SymbolicLlt<usize>> {
        let symbolic = hessian.symbolic();
        let key = (
            hessian.nrows(),
            symbolic.col_ptr().to_vec(),
            symbolic.row_idx().to_vec(),
        );

        if let (Some(pattern), Some(cached_key)) = (&self.symbolic_pattern, &self.pattern_key)
            && *cached_key == key
        {
            return Ok(pattern.clone());
        }

        debug!(
            "computing symbolic LLT for {} x {} Hessian ({} nonzeros)",
            hessian.nrows(),
            hessian.ncols(),
            key.2.len()
        );
        let pattern = solvers::SymbolicLlt::try_new(symbolic, faer::Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed("symbolic analysis failed".to_string())
                .log_with_source(e)
        })?;
        self.symbolic_pattern = Some(pattern.clone());
        self.pattern_key = Some(key);
        self.symbolic_analyses += 1;
        Ok(pattern)
    }

    /// Solve `hessian · delta = b` for a symmetric positive definite `hessian`.
    pub fn solve(&mut self, hessian: &SparseMatrix, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        let n = hessian.nrows();
        if hessian.ncols() != n {
            return Err(LinAlgError::DimensionMismatch {
                expected: n,
                actual: hessian.ncols(),
            }
            .log());
        }
        if b.len() != n {
            return Err(LinAlgError::DimensionMismatch {
                expected: n,
                actual: b.len(),
            }
            .log());
        }

        let symbolic = self.symbolic_for(hessian)?;
        let cholesky =
            solvers::Llt::try_new_with_symbolic(symbolic, hessian.as_ref(), faer::Side::Lower)
                .map_err(|e| {
                    LinAlgError::FactorizationFailed(format!(
                        "{n} x {n} sparse system is not positive definite"
                    ))
                    .log_with_source(e)
                })?;

        let rhs = Mat::from_fn(n, 1, |i, _| b[i]);
        let solution = cholesky.solve(rhs);
        let delta = DVector::from_fn(n, |i, _| solution[(i, 0)]);
        ensure_finite(delta.iter())?;
        Ok(delta)
    }
}
