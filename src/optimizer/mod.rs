//! Optimization drivers for nonlinear least squares problems.
//!
//! The driver never sees measurements directly. A [`MeasurementModel`] owns the
//! parameter state and knows how to linearize its measurements into normal
//! equations and how to apply an update; the driver only orchestrates the
//! build / check / solve / apply loop.

use crate::core::RobustEstimator;
use crate::error::{ErrorKind, SolverError};
use crate::linalg::{LinAlgError, NormalEquations};
use std::fmt;
use thiserror::Error;
use tracing::error;

pub mod gauss_newton;

pub use gauss_newton::{GaussNewton, GaussNewtonConfig, GaussNewtonSummary, IterationStats};

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Factorization of the normal equations failed
    #[error("Linear solve failed: {0}")]
    LinearSolveFailed(String),

    /// The model reported a NaN or infinite cost
    #[error("Non-finite cost {cost} at iteration {iteration}")]
    NonFiniteCost { cost: f64, iteration: usize },

    /// Error raised by a measurement model
    #[error("Measurement model error: {0}")]
    Model(String),

    /// Structural error from the linear algebra layer
    #[error(transparent)]
    LinAlg(#[from] LinAlgError),

    /// Error from the core bookkeeping types
    #[error(transparent)]
    Core(#[from] SolverError),
}

impl OptimizerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizerError::LinearSolveFailed(_) | OptimizerError::NonFiniteCost { .. } => {
                ErrorKind::Numerical
            }
            OptimizerError::Model(_) => ErrorKind::Model,
            OptimizerError::LinAlg(err) => err.kind(),
            OptimizerError::Core(err) => err.kind(),
        }
    }

    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Vector type of a model's normal equations
pub type ModelVector<M> = <<M as MeasurementModel>::System as NormalEquations>::Vector;

/// Linear solver state of a model's normal equations
pub type SystemSolver<M> = <<M as MeasurementModel>::System as NormalEquations>::Solver;

/// Problem-specific linearization and update.
///
/// Implemented by vision back-ends (bundle adjustment, frame alignment, ...).
/// Static dispatch keeps the fixed-size block types of each problem visible
/// to the compiler.
pub trait MeasurementModel {
    /// Hessian representation: fixed-size, dense or block-sparse
    type System: NormalEquations;

    /// Linearize at the current state: reset and fill `a` and `b`, return the cost.
    ///
    /// Implementations typically run [`crate::core::SystemBuilder`] over their
    /// samples with `cost_function` as robust estimator.
    fn build_ls_system<E: RobustEstimator + ?Sized>(
        &mut self,
        a: &mut Self::System,
        b: &mut ModelVector<Self>,
        cost_function: &E,
    ) -> OptimizerResult<f64>;

    /// Apply the solution of `a · delta = b` to the state.
    ///
    /// Plain vector addition or a constrained / manifold update, as the model defines.
    fn apply(&mut self, delta: &ModelVector<Self>) -> OptimizerResult<()>;
}

/// Status of an optimization process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationStatus {
    /// `optimize` has not been called yet
    #[default]
    NotStarted,
    /// Cost dropped below the configured threshold
    CostThresholdReached,
    /// Iteration budget exhausted
    MaxIterationsReached,
    /// Factorization failed or the cost became non-finite
    NumericalFailure,
    /// The model or the system structure reported an error
    Failed,
}

impl OptimizationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, OptimizationStatus::CostThresholdReached)
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::NotStarted => write!(f, "Not started"),
            OptimizationStatus::CostThresholdReached => write!(f, "Cost threshold reached"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
            OptimizationStatus::Failed => write!(f, "Failed"),
        }
    }
}
