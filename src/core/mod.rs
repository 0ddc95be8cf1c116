//! Core building blocks of the normal-equation backend
//!
//! - Robust estimators for outlier down-weighting
//! - Termination criteria for the Gauss-Newton loop
//! - Joint measurement bookkeeping driving the block sparsity pattern
//! - The system builder accumulating weighted `H` and `b`

pub mod joint_measurements;
pub mod robust;
pub mod system_builder;
pub mod termination;

pub use joint_measurements::{JointMeasurements, MeasurementSet};
pub use robust::{CauchyWeight, GemanMcClureWeight, HuberWeight, NoWeighting, RobustEstimator};
pub use system_builder::{PairSystem, SystemBuilder, is_finite_sample};
pub use termination::{TerminationChecks, TerminationCriteria, TerminationReason};
