//! Reference measurement models.
//!
//! Small but complete [`MeasurementModel`](crate::optimizer::MeasurementModel)
//! implementations, one per kind of normal-equation system the driver handles:
//!
//! - [`LinearModel`]: linear least squares on a fixed-size dense system
//! - [`RigidAlignment2D`]: nonlinear 2D rigid alignment with an angle-wrapping update
//! - [`TranslationGraph`]: many entities coupled by relative measurements, solved
//!   on a block-sparse Hessian
//!
//! Real back-ends (bundle adjustment, dense frame alignment) follow the same
//! pattern: compute per-sample Jacobians and residuals, hand them to a
//! [`SystemBuilder`](crate::core::SystemBuilder) and write the result into the
//! system the driver passes in.

pub mod linear;
pub mod rigid_alignment;
pub mod translation_graph;

pub use linear::LinearModel;
pub use rigid_alignment::RigidAlignment2D;
pub use translation_graph::{OffsetMeasurement, TranslationGraph};
