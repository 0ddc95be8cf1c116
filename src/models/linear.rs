//! Linear least squares `min Σ ||Aᵢ·x - yᵢ||²` as a measurement model.

use crate::core::{RobustEstimator, SystemBuilder};
use crate::error::{SolverError, SolverResult};
use crate::optimizer::{MeasurementModel, ModelVector, OptimizerResult};
use nalgebra::{SMatrix, SVector};

/// Samples `rᵢ = Aᵢ·x - yᵢ` with constant Jacobian `Aᵢ`.
///
/// Gauss-Newton solves this exactly in one step when `Σ AᵢᵀAᵢ` is positive definite.
#[derive(Debug, Clone)]
pub struct LinearModel<const M: usize, const N: usize> {
    jacobians: Vec<SMatrix<f64, M, N>>,
    targets: Vec<SVector<f64, M>>,
    x: SVector<f64, N>,
    builder: SystemBuilder,
}

impl<const M: usize, const N: usize> LinearModel<M, N> {
    /// Model with design blocks `jacobians`, observations `targets` and start point `x`.
    pub fn new(
        jacobians: Vec<SMatrix<f64, M, N>>,
        targets: Vec<SVector<f64, M>>,
        x: SVector<f64, N>,
    ) -> SolverResult<Self> {
        if jacobians.len() != targets.len() {
            return Err(SolverError::Configuration(format!(
                "{} design blocks paired with {} observations",
                jacobians.len(),
                targets.len()
            )));
        }
        Ok(Self {
            jacobians,
            targets,
            x,
            builder: SystemBuilder::new(),
        })
    }

    pub fn with_builder(mut self, builder: SystemBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Current estimate
    pub fn x(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn residuals(&self) -> Vec<SVector<f64, M>> {
        self.jacobians
            .iter()
            .zip(&self.targets)
            .map(|(a, y)| a * self.x - y)
            .collect()
    }
}

impl<const M: usize, const N: usize> MeasurementModel for LinearModel<M, N> {
    type System = SMatrix<f64, N, N>;

    fn build_ls_system<E: RobustEstimator + ?Sized>(
        &mut self,
        a: &mut Self::System,
        b: &mut ModelVector<Self>,
        cost_function: &E,
    ) -> OptimizerResult<f64> {
        a.fill(0.0);
        b.fill(0.0);
        let residuals = self.residuals();
        let cost = self
            .builder
            .build(&self.jacobians, &residuals, cost_function, a, b)?;
        Ok(cost)
    }

    fn apply(&mut self, delta: &ModelVector<Self>) -> OptimizerResult<()> {
        self.x -= delta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoWeighting;
    use nalgebra::{Matrix1x2, Matrix2, Vector1, Vector2};

    #[test]
    fn test_build_matches_hand_computed_system() {
        let mut model = LinearModel::new(
            vec![Matrix1x2::new(1.0, 2.0), Matrix1x2::new(-1.0, 4.0)],
            vec![Vector1::new(0.0), Vector1::new(3.0)],
            Vector2::new(1.0, 1.0),
        )
        .unwrap();

        // Residuals at x = (1, 1): r1 = 3, r2 = 0
        let mut a = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let cost = model.build_ls_system(&mut a, &mut b, &NoWeighting).unwrap();

        assert_eq!(a, Matrix2::new(2.0, -2.0, -2.0, 20.0));
        assert_eq!(b, Vector2::new(3.0, 6.0));
        assert_eq!(cost, 4.5);
    }

    #[test]
    fn test_build_resets_previous_system() {
        let mut model = LinearModel::new(
            vec![Matrix1x2::new(1.0, 0.0)],
            vec![Vector1::new(1.0)],
            Vector2::zeros(),
        )
        .unwrap();

        let mut a = Matrix2::repeat(7.0);
        let mut b = Vector2::repeat(7.0);
        model.build_ls_system(&mut a, &mut b, &NoWeighting).unwrap();
        assert_eq!(a, Matrix2::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(b, Vector2::new(-1.0, 0.0));
    }

    #[test]
    fn test_apply_subtracts_delta() {
        let mut model = LinearModel::<1, 2>::new(vec![], vec![], Vector2::new(1.0, 2.0)).unwrap();
        model.apply(&Vector2::new(0.5, -1.0)).unwrap();
        assert_eq!(*model.x(), Vector2::new(0.5, 3.0));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let result = LinearModel::new(
            vec![Matrix1x2::new(1.0, 0.0)],
            vec![],
            Vector2::zeros(),
        );
        assert!(matches!(result, Err(SolverError::Configuration(_))));
    }
}
