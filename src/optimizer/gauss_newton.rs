//! Gauss-Newton driver for normal-equation problems.
//!
//! The driver repeats four steps until a [`TerminationCriteria`] check fires:
//!
//! ```text
//! cost = model.build_ls_system(A, b, cost_function)
//! stop if criteria.finished(cost, iterations)
//! A · delta = b            (Cholesky)
//! model.apply(delta)
//! ```
//!
//! Because the check runs after every build, the final cost always belongs to the
//! most recently evaluated system, never to the state before the last update.
//! A factorization failure or a non-finite cost aborts the call with an error.
//!
//! # Example
//!
//! ```
//! use gnsolve::core::{NoWeighting, TerminationCriteria};
//! use gnsolve::models::LinearModel;
//! use gnsolve::optimizer::GaussNewton;
//! use nalgebra::{SMatrix, SVector, Vector2};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rows = vec![
//!     SMatrix::<f64, 1, 2>::new(1.0, 0.0),
//!     SMatrix::<f64, 1, 2>::new(0.0, 1.0),
//!     SMatrix::<f64, 1, 2>::new(1.0, 1.0),
//! ];
//! let targets = vec![
//!     SVector::<f64, 1>::new(2.0),
//!     SVector::<f64, 1>::new(-1.0),
//!     SVector::<f64, 1>::new(1.0),
//! ];
//! let mut model = LinearModel::new(rows, targets, Vector2::zeros())?;
//!
//! let mut solver = GaussNewton::new();
//! solver.optimize(&mut model, &NoWeighting, &TerminationCriteria::default())?;
//!
//! assert_eq!(solver.iterations(), 1);
//! assert!(solver.costs() < 1e-20);
//! # Ok(())
//! # }
//! ```

use crate::core::{RobustEstimator, TerminationCriteria, TerminationReason};
use crate::error::ErrorKind;
use crate::linalg::NormalEquations;
use crate::optimizer::{
    MeasurementModel, OptimizationStatus, OptimizerError, OptimizerResult, SystemSolver,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time};
use tracing::{Level, debug, info};

/// Per-iteration statistics (Ceres-style table rows).
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Number of updates applied before this evaluation
    pub iteration: usize,
    /// Cost returned by `build_ls_system`
    pub cost: f64,
    /// `previous_cost - cost`, zero for the first evaluation
    pub cost_change: f64,
    /// Norm of the right-hand side `b`
    pub gradient_norm: f64,
    /// Norm of the update that led to this evaluation
    pub step_norm: f64,
    /// Time spent since the previous evaluation in milliseconds
    pub iter_time_ms: f64,
    /// Total elapsed time in milliseconds
    pub total_time_ms: f64,
}

impl IterationStats {
    /// Print table header
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>13}",
            "iter", "cost", "cost_change", "|gradient|", "|step|", "iter_time", "total_time"
        );
    }

    pub fn print_line(&self) {
        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>9.2}ms  {:>11.2}ms",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.iter_time_ms,
            self.total_time_ms
        );
    }
}

/// Summary of one `optimize` call.
#[derive(Debug, Clone)]
pub struct GaussNewtonSummary {
    /// Cost of the first evaluated system
    pub initial_cost: f64,
    /// Cost of the last evaluated system
    pub final_cost: f64,
    /// Number of updates applied
    pub iterations: usize,
    /// Largest update norm
    pub max_step_norm: f64,
    /// Norm of the last applied update
    pub final_step_norm: f64,
    /// Total time elapsed
    pub total_time: time::Duration,
    /// Average time per evaluation
    pub average_time_per_iteration: time::Duration,
    /// How the loop ended
    pub status: OptimizationStatus,
}

impl fmt::Display for GaussNewtonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Gauss-Newton Final Result")?;
        if self.status.is_converged() {
            writeln!(f, "CONVERGED ({})", self.status)?;
        } else {
            writeln!(f, "STOPPED ({})", self.status)?;
        }

        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total: {}", self.iterations)?;
        writeln!(f)?;
        writeln!(f, "Parameter Update:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_step_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_step_norm)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )?;

        Ok(())
    }
}

/// Configuration of the Gauss-Newton driver.
///
/// Stop conditions live in [`TerminationCriteria`], which is passed to each
/// [`GaussNewton::optimize`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussNewtonConfig {
    /// Keep per-iteration statistics in [`GaussNewton::history`].
    ///
    /// Statistics are always collected while DEBUG logging is enabled.
    pub keep_history: bool,
}

impl GaussNewtonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep per-iteration statistics after `optimize` returns
    pub fn with_keep_history(mut self, keep_history: bool) -> Self {
        self.keep_history = keep_history;
        self
    }
}

/// Gauss-Newton driver.
///
/// Owns nothing but its configuration and the record of the last `optimize`
/// call; the model, the robust estimator and the criteria are borrowed.
#[derive(Debug, Clone)]
pub struct GaussNewton {
    config: GaussNewtonConfig,
    cost: f64,
    iterations: usize,
    status: OptimizationStatus,
    history: Vec<IterationStats>,
    summary: Option<GaussNewtonSummary>,
}

impl Default for GaussNewton {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussNewton {
    pub fn new() -> Self {
        Self::with_config(GaussNewtonConfig::default())
    }

    pub fn with_config(config: GaussNewtonConfig) -> Self {
        Self {
            config,
            cost: f64::NAN,
            iterations: 0,
            status: OptimizationStatus::NotStarted,
            history: Vec::new(),
            summary: None,
        }
    }

    pub fn config(&self) -> &GaussNewtonConfig {
        &self.config
    }

    /// Last recorded cost, NaN before the first evaluation
    pub fn costs(&self) -> f64 {
        self.cost
    }

    /// Number of updates applied by the last `optimize` call
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn status(&self) -> OptimizationStatus {
        self.status
    }

    /// Summary of the last `optimize` call that terminated normally
    pub fn summary(&self) -> Option<&GaussNewtonSummary> {
        self.summary.as_ref()
    }

    /// Per-evaluation statistics, empty unless collected
    pub fn history(&self) -> &[IterationStats] {
        &self.history
    }

    /// Run the build / check / solve / apply loop until a termination check fires.
    ///
    /// Returns the status the loop ended with. Factorization failures, non-finite
    /// costs and model errors abort the call; `costs()` and `iterations()` then
    /// describe the last successful evaluation.
    pub fn optimize<M, E>(
        &mut self,
        model: &mut M,
        cost_function: &E,
        criteria: &TerminationCriteria,
    ) -> OptimizerResult<OptimizationStatus>
    where
        M: MeasurementModel,
        E: RobustEstimator + ?Sized,
    {
        let mut solver: SystemSolver<M> = Default::default();
        self.optimize_with_solver(model, &mut solver, cost_function, criteria)
    }

    /// Same as [`optimize`](Self::optimize) with a caller-owned linear solver.
    ///
    /// The solver is reused for every iteration, and can be carried over to the
    /// next call when the sparsity pattern of the problem does not change.
    pub fn optimize_with_solver<M, E>(
        &mut self,
        model: &mut M,
        solver: &mut SystemSolver<M>,
        cost_function: &E,
        criteria: &TerminationCriteria,
    ) -> OptimizerResult<OptimizationStatus>
    where
        M: MeasurementModel,
        E: RobustEstimator + ?Sized,
    {
        self.reset();

        let start = time::Instant::now();
        let log_table = tracing::enabled!(Level::DEBUG);
        let collect_stats = log_table || self.config.keep_history;
        if log_table {
            IterationStats::print_header();
        }

        let (mut a, mut b) = M::System::empty();
        let mut initial_cost = None;
        let mut step_norm = 0.0;
        let mut max_step_norm: f64 = 0.0;
        let mut last_evaluation = start;

        loop {
            let cost = match model.build_ls_system(&mut a, &mut b, cost_function) {
                Ok(cost) => cost,
                Err(err) => return Err(self.fail(err)),
            };
            if !cost.is_finite() {
                let err = OptimizerError::NonFiniteCost {
                    cost,
                    iteration: self.iterations,
                }
                .log();
                return Err(self.fail(err));
            }

            let cost_change = if self.cost.is_nan() {
                0.0
            } else {
                self.cost - cost
            };
            initial_cost.get_or_insert(cost);
            self.cost = cost;

            if collect_stats {
                let now = time::Instant::now();
                let stats = IterationStats {
                    iteration: self.iterations,
                    cost,
                    cost_change,
                    gradient_norm: M::System::vector_norm(&b),
                    step_norm,
                    iter_time_ms: (now - last_evaluation).as_secs_f64() * 1000.0,
                    total_time_ms: (now - start).as_secs_f64() * 1000.0,
                };
                last_evaluation = now;
                if log_table {
                    stats.print_line();
                }
                self.history.push(stats);
            }

            if let Some(reason) = criteria.reason(cost, self.iterations) {
                self.status = match reason {
                    TerminationReason::MaxIterations => OptimizationStatus::MaxIterationsReached,
                    TerminationReason::CostThreshold => OptimizationStatus::CostThresholdReached,
                };
                info!(
                    "Gauss-Newton stopped after {} iterations: {} (cost {:.6e})",
                    self.iterations, reason, cost
                );

                let total_time = start.elapsed();
                let summary = GaussNewtonSummary {
                    initial_cost: initial_cost.unwrap_or(cost),
                    final_cost: cost,
                    iterations: self.iterations,
                    max_step_norm,
                    final_step_norm: step_norm,
                    total_time,
                    average_time_per_iteration: total_time
                        / u32::try_from(self.iterations + 1).unwrap_or(u32::MAX),
                    status: self.status,
                };
                if log_table {
                    debug!("{}", summary);
                }
                self.summary = Some(summary);
                if !self.config.keep_history {
                    self.history.clear();
                }
                return Ok(self.status);
            }

            let delta = match a.solve_spd(solver, &b) {
                Ok(delta) => delta,
                Err(err) => {
                    let err = OptimizerError::LinearSolveFailed(format!(
                        "iteration {}: {}",
                        self.iterations, err
                    ))
                    .log();
                    return Err(self.fail(err));
                }
            };
            step_norm = M::System::vector_norm(&delta);
            max_step_norm = max_step_norm.max(step_norm);

            if let Err(err) = model.apply(&delta) {
                return Err(self.fail(err));
            }
            self.iterations += 1;
        }
    }

    fn reset(&mut self) {
        self.cost = f64::NAN;
        self.iterations = 0;
        self.status = OptimizationStatus::NotStarted;
        self.history.clear();
        self.summary = None;
    }

    fn fail(&mut self, err: OptimizerError) -> OptimizerError {
        self.status = match err.kind() {
            ErrorKind::Numerical => OptimizationStatus::NumericalFailure,
            _ => OptimizationStatus::Failed,
        };
        err
    }
}
