//! 2D translation graph on a block-sparse Hessian.
//!
//! `N` entities with unknown 2D positions are coupled by relative offset
//! measurements `zₖ ≈ x_j - x_i` and anchored by one absolute prior. Each
//! measured pair is registered in a [`JointMeasurements`] under its smaller
//! entity index, so the Hessian only stores its upper-triangular off-diagonal
//! blocks:
//!
//! ```text
//! H_ii += Σ w·JᵢᵀJᵢ     H_jj += Σ w·JⱼᵀJⱼ     H_ij += Σ w·JᵢᵀJⱼ
//! rₖ = x_j - x_i - zₖ,   Jᵢ = -I,   Jⱼ = I
//! ```
//!
//! All measurements of a pair go through [`SystemBuilder::build_pair`], so a
//! skipped sample is missing from every block it would have touched.
//! The prior is never robustified: it only fixes the gauge freedom.

use crate::core::{JointMeasurements, NoWeighting, RobustEstimator, SystemBuilder};
use crate::error::{SolverError, SolverResult};
use crate::linalg::{LinAlgError, SparseBlockMatrix};
use crate::optimizer::{MeasurementModel, ModelVector, OptimizerError, OptimizerResult};
use nalgebra::{DVector, Matrix2, Vector2};
use tracing::debug;

/// Relative offset between two entities, stored with `from < to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetMeasurement {
    pub from: usize,
    pub to: usize,
    pub offset: Vector2<f64>,
}

#[derive(Debug, Clone)]
pub struct TranslationGraph {
    positions: Vec<Vector2<f64>>,
    measurements: Vec<OffsetMeasurement>,
    joint: JointMeasurements,
    anchor: usize,
    anchor_position: Vector2<f64>,
    builder: SystemBuilder,
}

impl TranslationGraph {
    /// Graph over `initial_positions`, with entity 0 anchored at its initial position.
    pub fn new(initial_positions: Vec<Vector2<f64>>) -> SolverResult<Self> {
        let Some(&anchor_position) = initial_positions.first() else {
            return Err(SolverError::Configuration(
                "translation graph needs at least one entity".to_string(),
            ));
        };
        let joint = JointMeasurements::with_entities(initial_positions.len());
        Ok(Self {
            positions: initial_positions,
            measurements: Vec::new(),
            joint,
            anchor: 0,
            anchor_position,
            builder: SystemBuilder::new(),
        })
    }

    /// Anchor `entity` at `position` instead.
    pub fn with_anchor(mut self, entity: usize, position: Vector2<f64>) -> SolverResult<Self> {
        if entity >= self.positions.len() {
            return Err(SolverError::Configuration(format!(
                "anchor {entity} is out of range for {} entities",
                self.positions.len()
            )));
        }
        self.anchor = entity;
        self.anchor_position = position;
        Ok(self)
    }

    pub fn with_builder(mut self, builder: SystemBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Add a measurement `offset ≈ x_to - x_from` and return its id.
    pub fn add_measurement(
        &mut self,
        from: usize,
        to: usize,
        offset: Vector2<f64>,
    ) -> SolverResult<usize> {
        if from == to {
            return Err(SolverError::InvalidInput(format!(
                "measurement links entity {from} to itself"
            )));
        }
        let measurement = if from < to {
            OffsetMeasurement { from, to, offset }
        } else {
            OffsetMeasurement {
                from: to,
                to: from,
                offset: -offset,
            }
        };

        let id = self.measurements.len();
        self.joint
            .add_measurement_for_entity(measurement.from, measurement.to, id)?;
        self.measurements.push(measurement);
        Ok(id)
    }

    pub fn num_entities(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vector2<f64>] {
        &self.positions
    }

    pub fn measurements(&self) -> &[OffsetMeasurement] {
        &self.measurements
    }

    pub fn joint_measurements(&self) -> &JointMeasurements {
        &self.joint
    }

    fn residual(&self, measurement: &OffsetMeasurement) -> Vector2<f64> {
        self.positions[measurement.to] - self.positions[measurement.from] - measurement.offset
    }

    fn add_gradient(b: &mut DVector<f64>, entity: usize, gradient: &Vector2<f64>) {
        let mut segment = b.fixed_rows_mut::<2>(2 * entity);
        segment += gradient;
    }
}

impl MeasurementModel for TranslationGraph {
    type System = SparseBlockMatrix<2, 2>;

    fn build_ls_system<E: RobustEstimator + ?Sized>(
        &mut self,
        a: &mut Self::System,
        b: &mut ModelVector<Self>,
        cost_function: &E,
    ) -> OptimizerResult<f64> {
        let n = self.positions.len();
        a.resize(n, n)?;
        a.reserve(n + self.joint.num_blocks());
        *b = DVector::zeros(2 * n);

        let mut squared_sum = 0.0;
        let mut used = 0;

        for (e0, e1, set) in self.joint.pairs() {
            let residuals: Vec<Vector2<f64>> = set
                .iter()
                .map(|&id| self.residual(&self.measurements[id]))
                .collect();
            let jacobians_from = vec![-Matrix2::<f64>::identity(); residuals.len()];
            let jacobians_to = vec![Matrix2::<f64>::identity(); residuals.len()];

            let pair =
                self.builder
                    .build_pair(&jacobians_from, &jacobians_to, &residuals, cost_function)?;

            // Blocks are materialised even when every sample was skipped, so the
            // sparsity pattern only depends on the registered pairs.
            *a.block(e0, e0)? += pair.h_aa;
            *a.block(e1, e1)? += pair.h_bb;
            *a.block(e0, e1)? += pair.h_ab;
            Self::add_gradient(b, e0, &pair.b_a);
            Self::add_gradient(b, e1, &pair.b_b);

            squared_sum += pair.squared_sum;
            used += pair.used;
        }

        let prior = [self.positions[self.anchor] - self.anchor_position];
        let mut gradient = Vector2::zeros();
        let prior_cost = self.builder.build(
            &[Matrix2::<f64>::identity()],
            &prior,
            &NoWeighting,
            a.block(self.anchor, self.anchor)?,
            &mut gradient,
        )?;
        if prior_cost.is_finite() {
            Self::add_gradient(b, self.anchor, &gradient);
            squared_sum += prior_cost;
            used += 1;
        }

        debug!(
            "translation graph system: {} entities, {} blocks, {} samples",
            n,
            a.num_blocks(),
            used
        );
        if used == 0 {
            return Ok(f64::NAN);
        }
        Ok(squared_sum / used as f64)
    }

    fn apply(&mut self, delta: &ModelVector<Self>) -> OptimizerResult<()> {
        let expected = 2 * self.positions.len();
        if delta.len() != expected {
            return Err(OptimizerError::LinAlg(
                LinAlgError::DimensionMismatch {
                    expected,
                    actual: delta.len(),
                }
                .log(),
            ));
        }
        for (entity, position) in self.positions.iter_mut().enumerate() {
            *position -= delta.fixed_rows::<2>(2 * entity);
        }
        Ok(())
    }
}
