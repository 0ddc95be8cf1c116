//! # gnsolve
//!
//! A Gauss-Newton backend for nonlinear least squares problems in computer vision:
//! multi-camera bundle adjustment, frame-to-frame alignment and similar refinement
//! tasks that repeatedly linearize and solve a normal-equations system.
//!
//! ## Features
//!
//! - **Robust weighting**: Huber, Cauchy and Geman-McClure M-estimators
//! - **System building**: weighted `H = Σ w·JᵀJ`, `b = Σ w·Jᵀr` with non-finite samples skipped,
//!   sequential or rayon-parallel
//! - **Block-sparse storage**: lazily materialised fixed-size blocks driven by joint measurements
//! - **SPD solves**: nalgebra Cholesky for small systems, faer sparse Cholesky for large ones
//! - **Gauss-Newton driver**: model-agnostic build / check / solve / apply loop
//!
//! ## Measurement models
//!
//! Problems plug in through the [`MeasurementModel`] trait. The [`models`] module carries
//! reference implementations: a linear least-squares model, 2D rigid alignment and a
//! block-sparse translation graph.

// Local modules
pub mod core;
pub mod error;
pub mod linalg;
pub mod logger;
pub mod models;
pub mod optimizer;

// Re-export core types
pub use core::{
    CauchyWeight, GemanMcClureWeight, HuberWeight, JointMeasurements, NoWeighting, PairSystem,
    RobustEstimator, SystemBuilder, TerminationChecks, TerminationCriteria,
};
pub use error::{SolverError, SolverResult};

// Re-export linear algebra types
pub use linalg::{NormalEquations, SparseBlockMatrix, SparseCholeskySolver};

// Re-export logger
pub use logger::{init_logger, init_logger_with_level};

// Re-export optimizer types
pub use optimizer::{
    GaussNewton, GaussNewtonConfig, MeasurementModel, OptimizationStatus, OptimizerError,
};
