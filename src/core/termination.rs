//! Stop conditions for the Gauss-Newton loop.
//!
//! [`TerminationCriteria`] is a small piece of configuration: an iteration
//! budget, a cost threshold and the set of checks that are enabled. Evaluation
//! is pure; any enabled check that triggers stops the optimization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Set of enabled termination checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationChecks {
    pub iterations: bool,
    pub cost: bool,
}

impl TerminationChecks {
    pub const NONE: Self = Self {
        iterations: false,
        cost: false,
    };
    pub const ITERATIONS: Self = Self {
        iterations: true,
        cost: false,
    };
    pub const COST: Self = Self {
        iterations: false,
        cost: true,
    };
    pub const ALL: Self = Self {
        iterations: true,
        cost: true,
    };
}

impl Default for TerminationChecks {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for TerminationChecks {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            iterations: self.iterations || rhs.iterations,
            cost: self.cost || rhs.cost,
        }
    }
}

/// Which check stopped the optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// `iterations > max_iterations`
    MaxIterations,
    /// `cost < cost_threshold`
    CostThreshold,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::MaxIterations => write!(f, "Maximum iterations exceeded"),
            TerminationReason::CostThreshold => write!(f, "Cost below threshold"),
        }
    }
}

/// Iteration and cost based stop conditions.
///
/// ```
/// use gnsolve::core::termination::{TerminationChecks, TerminationCriteria};
///
/// let criteria = TerminationCriteria::new()
///     .with_max_iterations(40)
///     .with_cost_threshold(1e-12)
///     .with_checks(TerminationChecks::ITERATIONS | TerminationChecks::COST);
///
/// assert!(criteria.finished(1.0, 41));
/// assert!(!criteria.finished(1.0, 5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationCriteria {
    max_iterations: usize,
    cost_threshold: f64,
    checks: TerminationChecks,
}

impl Default for TerminationCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            cost_threshold: 1e-10,
            checks: TerminationChecks::ALL,
        }
    }
}

impl TerminationCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration budget
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the cost threshold
    pub fn with_cost_threshold(mut self, cost_threshold: f64) -> Self {
        self.cost_threshold = cost_threshold;
        self
    }

    /// Set which checks are enabled
    pub fn with_checks(mut self, checks: TerminationChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn set_cost_threshold(&mut self, cost_threshold: f64) {
        self.cost_threshold = cost_threshold;
    }

    pub fn set_checks(&mut self, checks: TerminationChecks) {
        self.checks = checks;
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn cost_threshold(&self) -> f64 {
        self.cost_threshold
    }

    pub fn checks(&self) -> TerminationChecks {
        self.checks
    }

    /// First enabled check that triggers for `cost` after `iterations` updates.
    pub fn reason(&self, cost: f64, iterations: usize) -> Option<TerminationReason> {
        if self.checks.iterations && iterations > self.max_iterations {
            Some(TerminationReason::MaxIterations)
        } else if self.checks.cost && cost < self.cost_threshold {
            Some(TerminationReason::CostThreshold)
        } else {
            None
        }
    }

    /// True if any enabled check triggers.
    pub fn finished(&self, cost: f64, iterations: usize) -> bool {
        self.reason(cost, iterations).is_some()
    }
}
