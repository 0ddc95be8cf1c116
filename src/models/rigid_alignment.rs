//! Frame-to-frame 2D rigid alignment.
//!
//! Estimates the rotation `θ` and translation `t` mapping source points onto
//! their target correspondences:
//!
//! ```text
//! rᵢ = R(θ)·pᵢ + t - qᵢ
//! ∂rᵢ/∂(θ, tx, ty) = [ R'(θ)·pᵢ | I₂ ]
//! ```
//!
//! The update subtracts the Gauss-Newton solution and wraps the angle back
//! into (-π, π], the simplest form of a manifold update.

use crate::core::{RobustEstimator, SystemBuilder};
use crate::error::{SolverError, SolverResult};
use crate::optimizer::{MeasurementModel, ModelVector, OptimizerResult};
use nalgebra::{Matrix2x3, Matrix3, Point2, Rotation2, Vector2, Vector3};

/// Wrap an angle into (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

/// Rigid alignment of two 2D point sets with known correspondences.
#[derive(Debug, Clone)]
pub struct RigidAlignment2D {
    source: Vec<Point2<f64>>,
    target: Vec<Point2<f64>>,
    theta: f64,
    translation: Vector2<f64>,
    builder: SystemBuilder,
}

impl RigidAlignment2D {
    /// Alignment of `source[i]` onto `target[i]`, starting from the identity.
    pub fn new(source: Vec<Point2<f64>>, target: Vec<Point2<f64>>) -> SolverResult<Self> {
        if source.len() != target.len() {
            return Err(SolverError::Configuration(format!(
                "{} source points paired with {} target points",
                source.len(),
                target.len()
            )));
        }
        Ok(Self {
            source,
            target,
            theta: 0.0,
            translation: Vector2::zeros(),
            builder: SystemBuilder::new(),
        })
    }

    /// Start from the given pose instead of the identity.
    pub fn with_initial_pose(mut self, theta: f64, translation: Vector2<f64>) -> Self {
        self.theta = wrap_angle(theta);
        self.translation = translation;
        self
    }

    pub fn with_builder(mut self, builder: SystemBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn translation(&self) -> &Vector2<f64> {
        &self.translation
    }

    /// Apply the current estimate to a source point.
    pub fn transform_point(&self, point: &Point2<f64>) -> Point2<f64> {
        Rotation2::new(self.theta) * point + self.translation
    }

    fn linearize(&self) -> (Vec<Matrix2x3<f64>>, Vec<Vector2<f64>>) {
        let (sin, cos) = self.theta.sin_cos();
        self.source
            .iter()
            .zip(&self.target)
            .map(|(p, q)| {
                let residual = self.transform_point(p) - q;
                let d_rotation = Vector2::new(-sin * p.x - cos * p.y, cos * p.x - sin * p.y);
                let jacobian = Matrix2x3::new(
                    d_rotation.x, 1.0, 0.0, //
                    d_rotation.y, 0.0, 1.0,
                );
                (jacobian, residual)
            })
            .unzip()
    }
}

impl MeasurementModel for RigidAlignment2D {
    type System = Matrix3<f64>;

    fn build_ls_system<E: RobustEstimator + ?Sized>(
        &mut self,
        a: &mut Self::System,
        b: &mut ModelVector<Self>,
        cost_function: &E,
    ) -> OptimizerResult<f64> {
        *a = Matrix3::zeros();
        *b = Vector3::zeros();
        let (jacobians, residuals) = self.linearize();
        let cost = self
            .builder
            .build(&jacobians, &residuals, cost_function, a, b)?;
        Ok(cost)
    }

    fn apply(&mut self, delta: &ModelVector<Self>) -> OptimizerResult<()> {
        self.theta = wrap_angle(self.theta - delta.x);
        self.translation -= Vector2::new(delta.y, delta.z);
        Ok(())
    }
}
