//! Error types for the gnsolve library
//!
//! Module-level errors (`LinAlgError`, `OptimizerError`) are folded into
//! [`SolverError`], whose variants follow the failure categories of the backend:
//! configuration mistakes, numerical breakdowns and invalid input, plus failures
//! of the external measurement model.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::{linalg::LinAlgError, optimizer::OptimizerError};
use thiserror::Error;

/// Main result type used throughout the gnsolve library
pub type SolverResult<T> = Result<T, SolverError>;

/// Failure category shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid block-matrix dimensions, out-of-range access, size mismatches
    Configuration,
    /// Factorization failure or a non-finite cost
    Numerical,
    /// Non-finite measurement data or invalid estimator parameters
    InvalidInput,
    /// Failure reported by a measurement model while linearizing or updating
    Model,
}

/// Main error type for the gnsolve library
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Dimension or indexing errors in the system structure
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Factorization failures and non-finite costs
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Errors raised by a measurement model
    #[error("Model error: {0}")]
    Model(String),
}

impl SolverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SolverError::Configuration(_) => ErrorKind::Configuration,
            SolverError::Numerical(_) => ErrorKind::Numerical,
            SolverError::InvalidInput(_) => ErrorKind::InvalidInput,
            SolverError::Model(_) => ErrorKind::Model,
        }
    }
}

fn categorize(kind: ErrorKind, message: String) -> SolverError {
    match kind {
        ErrorKind::Configuration => SolverError::Configuration(message),
        ErrorKind::Numerical => SolverError::Numerical(message),
        ErrorKind::InvalidInput => SolverError::InvalidInput(message),
        ErrorKind::Model => SolverError::Model(message),
    }
}

impl From<LinAlgError> for SolverError {
    fn from(err: LinAlgError) -> Self {
        categorize(err.kind(), err.to_string())
    }
}

impl From<OptimizerError> for SolverError {
    fn from(err: OptimizerError) -> Self {
        match err {
            OptimizerError::Core(inner) => inner,
            other => categorize(other.kind(), other.to_string()),
        }
    }
}
