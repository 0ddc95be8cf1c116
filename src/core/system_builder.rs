//! Accumulation of weighted normal equations from per-sample Jacobians and residuals.
//!
//! Given parallel slices of Jacobians `Jᵢ` (M x N) and residuals `rᵢ` (M) the
//! builder adds
//!
//! ```text
//! H += Σ wᵢ · Jᵢᵀ·Jᵢ
//! b += Σ wᵢ · Jᵢᵀ·rᵢ
//! ```
//!
//! with `wᵢ = estimator.weight(||rᵢ||²)`, and returns the unweighted mean of the
//! squared residual norms as the cost used for convergence tracking.
//!
//! Samples whose Jacobian, residual or weight is not finite are skipped rather
//! than poisoning the whole system. If no sample survives the cost is NaN and
//! `H`/`b` are left untouched.
//!
//! Samples that depend on two entities go through [`SystemBuilder::build_pair`],
//! which feeds both diagonal blocks, the coupling block and both gradient
//! segments from a single skip decision per sample.
//!
//! Large sample sets can be reduced in parallel with rayon: each worker folds an
//! independent partial sum, and the partial sums are merged pairwise.

use crate::core::robust::RobustEstimator;
use crate::error::{SolverError, SolverResult};
use nalgebra::{SMatrix, SVector};
use rayon::prelude::*;
use tracing::warn;

/// True if every entry of the Jacobian and residual is finite.
pub fn is_finite_sample<const M: usize, const N: usize>(
    jacobian: &SMatrix<f64, M, N>,
    residual: &SVector<f64, M>,
) -> bool {
    jacobian.iter().all(|v| v.is_finite()) && residual.iter().all(|v| v.is_finite())
}

/// Weight of a sample, or `None` if the sample has to be skipped.
fn sample_weight<const M: usize, const N: usize, E: RobustEstimator + ?Sized>(
    jacobian: &SMatrix<f64, M, N>,
    residual: &SVector<f64, M>,
    estimator: &E,
) -> Option<(f64, f64)> {
    if !is_finite_sample(jacobian, residual) {
        return None;
    }
    let squared_norm = residual.norm_squared();
    let weight = estimator.weight(squared_norm);
    weight.is_finite().then_some((weight, squared_norm))
}

/// Weight of a sample observing two entities, or `None` if it has to be skipped.
fn pair_weight<const M: usize, const NA: usize, const NB: usize, E>(
    jacobian_a: &SMatrix<f64, M, NA>,
    jacobian_b: &SMatrix<f64, M, NB>,
    residual: &SVector<f64, M>,
    estimator: &E,
) -> Option<(f64, f64)>
where
    E: RobustEstimator + ?Sized,
{
    if !jacobian_b.iter().all(|v| v.is_finite()) {
        return None;
    }
    sample_weight(jacobian_a, residual, estimator)
}

/// Partial sums of one accumulation pass.
#[derive(Debug, Clone)]
struct Accumulator<const M: usize, const N: usize> {
    hessian: SMatrix<f64, N, N>,
    gradient: SVector<f64, N>,
    squared_sum: f64,
    used: usize,
    skipped: usize,
}

impl<const M: usize, const N: usize> Accumulator<M, N> {
    fn zero() -> Self {
        Self {
            hessian: SMatrix::zeros(),
            gradient: SVector::zeros(),
            squared_sum: 0.0,
            used: 0,
            skipped: 0,
        }
    }

    fn push<E: RobustEstimator + ?Sized>(
        mut self,
        jacobian: &SMatrix<f64, M, N>,
        residual: &SVector<f64, M>,
        estimator: &E,
    ) -> Self {
        match sample_weight(jacobian, residual, estimator) {
            Some((weight, squared_norm)) => {
                self.hessian += jacobian.tr_mul(jacobian) * weight;
                self.gradient += jacobian.tr_mul(residual) * weight;
                self.squared_sum += squared_norm;
                self.used += 1;
            }
            None => self.skipped += 1,
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.hessian += other.hessian;
        self.gradient += other.gradient;
        self.squared_sum += other.squared_sum;
        self.used += other.used;
        self.skipped += other.skipped;
        self
    }
}

fn check_lengths(jacobians: usize, residuals: usize) -> SolverResult<()> {
    if jacobians == residuals {
        Ok(())
    } else {
        Err(SolverError::Configuration(format!(
            "{jacobians} Jacobians paired with {residuals} residuals"
        )))
    }
}

fn report_skipped(skipped: usize, total: usize) {
    if skipped > 0 {
        warn!(
            "skipped {} of {} samples with non-finite Jacobian, residual or weight",
            skipped, total
        );
    }
}

/// Normal-equation blocks of two entities observed by the same samples.
///
/// Every sample contributes to all five blocks or to none of them.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSystem<const NA: usize, const NB: usize> {
    pub h_aa: SMatrix<f64, NA, NA>,
    pub h_bb: SMatrix<f64, NB, NB>,
    pub h_ab: SMatrix<f64, NA, NB>,
    pub b_a: SVector<f64, NA>,
    pub b_b: SVector<f64, NB>,
    /// Sum of `||rᵢ||²` over the used samples
    pub squared_sum: f64,
    pub used: usize,
}

impl<const NA: usize, const NB: usize> PairSystem<NA, NB> {
    fn zero() -> Self {
        Self {
            h_aa: SMatrix::zeros(),
            h_bb: SMatrix::zeros(),
            h_ab: SMatrix::zeros(),
            b_a: SVector::zeros(),
            b_b: SVector::zeros(),
            squared_sum: 0.0,
            used: 0,
        }
    }

    /// Mean squared residual norm, NaN if no sample was used
    pub fn cost(&self) -> f64 {
        if self.used == 0 {
            f64::NAN
        } else {
            self.squared_sum / self.used as f64
        }
    }
}

/// Builds `H`, `b` and the mean squared residual from sample slices.
#[derive(Debug, Clone)]
pub struct SystemBuilder {
    parallel: bool,
    min_parallel_samples: usize,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self {
            parallel: true,
            min_parallel_samples: 4096,
        }
    }
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the rayon reduction in [`build`](Self::build)
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sample count from which [`build`](Self::build) switches to the parallel path
    pub fn with_min_parallel_samples(mut self, min_parallel_samples: usize) -> Self {
        self.min_parallel_samples = min_parallel_samples;
        self
    }

    /// Add the weighted normal equations of all samples to `hessian` and `gradient`.
    ///
    /// Returns the mean of `||rᵢ||²` over the samples that were accumulated.
    pub fn build<const M: usize, const N: usize, E: RobustEstimator + ?Sized>(
        &self,
        jacobians: &[SMatrix<f64, M, N>],
        residuals: &[SVector<f64, M>],
        estimator: &E,
        hessian: &mut SMatrix<f64, N, N>,
        gradient: &mut SVector<f64, N>,
    ) -> SolverResult<f64> {
        if self.parallel && jacobians.len() >= self.min_parallel_samples {
            return self.build_par(jacobians, residuals, estimator, hessian, gradient);
        }

        check_lengths(jacobians.len(), residuals.len())?;
        let acc = jacobians
            .iter()
            .zip(residuals)
            .fold(Accumulator::<M, N>::zero(), |acc, (j, r)| {
                acc.push(j, r, estimator)
            });
        Ok(Self::commit(acc, hessian, gradient))
    }

    /// Same as [`build`](Self::build), always reducing with rayon.
    pub fn build_par<const M: usize, const N: usize, E: RobustEstimator + ?Sized>(
        &self,
        jacobians: &[SMatrix<f64, M, N>],
        residuals: &[SVector<f64, M>],
        estimator: &E,
        hessian: &mut SMatrix<f64, N, N>,
        gradient: &mut SVector<f64, N>,
    ) -> SolverResult<f64> {
        check_lengths(jacobians.len(), residuals.len())?;
        let acc = jacobians
            .par_iter()
            .zip(residuals.par_iter())
            .fold(Accumulator::<M, N>::zero, |acc, (j, r)| {
                acc.push(j, r, estimator)
            })
            .reduce(Accumulator::<M, N>::zero, Accumulator::merge);
        Ok(Self::commit(acc, hessian, gradient))
    }

    fn commit<const M: usize, const N: usize>(
        acc: Accumulator<M, N>,
        hessian: &mut SMatrix<f64, N, N>,
        gradient: &mut SVector<f64, N>,
    ) -> f64 {
        report_skipped(acc.skipped, acc.used + acc.skipped);
        if acc.used == 0 {
            return f64::NAN;
        }
        *hessian += acc.hessian;
        *gradient += acc.gradient;
        acc.squared_sum / acc.used as f64
    }

    /// Linearize samples that depend on two entities at once.
    ///
    /// `jacobians_a[i]` and `jacobians_b[i]` are the derivatives of `residuals[i]`
    /// with respect to entity `a` and entity `b`. A sample is skipped as a whole
    /// if either Jacobian, the residual or the weight is not finite.
    pub fn build_pair<const M: usize, const NA: usize, const NB: usize, E>(
        &self,
        jacobians_a: &[SMatrix<f64, M, NA>],
        jacobians_b: &[SMatrix<f64, M, NB>],
        residuals: &[SVector<f64, M>],
        estimator: &E,
    ) -> SolverResult<PairSystem<NA, NB>>
    where
        E: RobustEstimator + ?Sized,
    {
        check_lengths(jacobians_a.len(), residuals.len())?;
        check_lengths(jacobians_b.len(), residuals.len())?;

        let mut pair = PairSystem::zero();
        let mut skipped = 0;
        for ((ja, jb), r) in jacobians_a.iter().zip(jacobians_b).zip(residuals) {
            match pair_weight(ja, jb, r, estimator) {
                Some((weight, squared_norm)) => {
                    pair.h_aa += ja.tr_mul(ja) * weight;
                    pair.h_bb += jb.tr_mul(jb) * weight;
                    pair.h_ab += ja.tr_mul(jb) * weight;
                    pair.b_a += ja.tr_mul(r) * weight;
                    pair.b_b += jb.tr_mul(r) * weight;
                    pair.squared_sum += squared_norm;
                    pair.used += 1;
                }
                None => skipped += 1,
            }
        }
        report_skipped(skipped, pair.used + skipped);
        Ok(pair)
    }

    /// Add the off-diagonal block `Σ wᵢ · Jaᵢᵀ·Jbᵢ` coupling two entities that are
    /// observed by the same samples.
    ///
    /// `jacobians_a[i]` and `jacobians_b[i]` are the derivatives of `residuals[i]`
    /// with respect to the two entities. Returns the number of samples used.
    pub fn build_cross<const M: usize, const NA: usize, const NB: usize, E>(
        &self,
        jacobians_a: &[SMatrix<f64, M, NA>],
        jacobians_b: &[SMatrix<f64, M, NB>],
        residuals: &[SVector<f64, M>],
        estimator: &E,
        block: &mut SMatrix<f64, NA, NB>,
    ) -> SolverResult<usize>
    where
        E: RobustEstimator + ?Sized,
    {
        check_lengths(jacobians_a.len(), residuals.len())?;
        check_lengths(jacobians_b.len(), residuals.len())?;

        let mut used = 0;
        let mut skipped = 0;
        for ((ja, jb), r) in jacobians_a.iter().zip(jacobians_b).zip(residuals) {
            match pair_weight(ja, jb, r, estimator) {
                Some((weight, _)) => {
                    *block += ja.tr_mul(jb) * weight;
                    used += 1;
                }
                None => skipped += 1,
            }
        }
        report_skipped(skipped, used + skipped);
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::robust::{HuberWeight, NoWeighting};
    use nalgebra::{Matrix1x2, Matrix2, Matrix2x3, Vector1, Vector2, Vector3};

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_ordinary_least_squares_two_samples() {
        // J1 = [1, 2], r1 = 3 ; J2 = [-1, 4], r2 = -2
        let jacobians = [Matrix1x2::new(1.0, 2.0), Matrix1x2::new(-1.0, 4.0)];
        let residuals = [Vector1::new(3.0), Vector1::new(-2.0)];

        let mut h = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let cost = SystemBuilder::new()
            .build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b)
            .unwrap();

        // H = J1ᵀJ1 + J2ᵀJ2 = [[1,2],[2,4]] + [[1,-4],[-4,16]]
        assert_eq!(h, Matrix2::new(2.0, -2.0, -2.0, 20.0));
        // b = J1ᵀr1 + J2ᵀr2 = [3,6] + [2,-8]
        assert_eq!(b, Vector2::new(5.0, -2.0));
        // (9 + 4) / 2
        assert!((cost - 6.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_accumulates_into_existing_system() {
        let jacobians = [Matrix1x2::new(1.0, 0.0)];
        let residuals = [Vector1::new(2.0)];
        let mut h = Matrix2::identity();
        let mut b = Vector2::new(1.0, 1.0);

        SystemBuilder::new()
            .build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b)
            .unwrap();
        assert_eq!(h, Matrix2::new(2.0, 0.0, 0.0, 1.0));
        assert_eq!(b, Vector2::new(3.0, 1.0));
    }

    #[test]
    fn test_robust_weight_scales_contribution() {
        let jacobians = [Matrix1x2::new(1.0, 1.0)];
        let residuals = [Vector1::new(4.0)];
        let huber = HuberWeight::new(1.0).unwrap();

        let mut h = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let cost = SystemBuilder::new()
            .build(&jacobians, &residuals, &huber, &mut h, &mut b)
            .unwrap();

        // w = 1 / 4
        assert!((h[(0, 0)] - 0.25).abs() < TOLERANCE);
        assert!((b[1] - 1.0).abs() < TOLERANCE);
        // Cost stays unweighted
        assert!((cost - 16.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let jacobians = [
            Matrix1x2::new(1.0, 2.0),
            Matrix1x2::new(f64::NAN, 0.0),
            Matrix1x2::new(-1.0, 4.0),
            Matrix1x2::new(1.0, 1.0),
        ];
        let residuals = [
            Vector1::new(3.0),
            Vector1::new(1.0),
            Vector1::new(-2.0),
            Vector1::new(f64::INFINITY),
        ];

        let mut h = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let cost = SystemBuilder::new()
            .build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b)
            .unwrap();

        assert_eq!(h, Matrix2::new(2.0, -2.0, -2.0, 20.0));
        assert_eq!(b, Vector2::new(5.0, -2.0));
        assert!((cost - 6.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_all_samples_skipped_leaves_system_untouched() {
        let jacobians = [Matrix1x2::new(f64::NAN, 0.0)];
        let residuals = [Vector1::new(1.0)];
        let mut h = Matrix2::identity();
        let mut b = Vector2::zeros();

        let cost = SystemBuilder::new()
            .build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b)
            .unwrap();
        assert!(cost.is_nan());
        assert_eq!(h, Matrix2::identity());
        assert_eq!(b, Vector2::zeros());
    }

    #[test]
    fn test_empty_input_has_undefined_cost() {
        let jacobians: [Matrix1x2<f64>; 0] = [];
        let residuals: [Vector1<f64>; 0] = [];
        let mut h = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let cost = SystemBuilder::new()
            .build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b)
            .unwrap();
        assert!(cost.is_nan());
    }

    #[test]
    fn test_length_mismatch_is_configuration_error() {
        let jacobians = [Matrix1x2::new(1.0, 2.0)];
        let residuals = [Vector1::new(3.0), Vector1::new(1.0)];
        let mut h = Matrix2::zeros();
        let mut b = Vector2::zeros();
        let result =
            SystemBuilder::new().build(&jacobians, &residuals, &NoWeighting, &mut h, &mut b);
        assert!(matches!(result, Err(SolverError::Configuration(_))));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 2000;
        let jacobians: Vec<Matrix2x3<f64>> = (0..n)
            .map(|i| {
                let t = i as f64 * 0.01;
                Matrix2x3::new(t.sin(), t.cos(), 1.0, -t.cos(), t.sin(), t)
            })
            .collect();
        let residuals: Vec<Vector2<f64>> = (0..n)
            .map(|i| Vector2::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
            .collect();
        let huber = HuberWeight::new(0.5).unwrap();

        let mut h_seq = nalgebra::Matrix3::zeros();
        let mut b_seq = Vector3::zeros();
        let cost_seq = SystemBuilder::new()
            .with_parallel(false)
            .build(&jacobians, &residuals, &huber, &mut h_seq, &mut b_seq)
            .unwrap();

        let mut h_par = nalgebra::Matrix3::zeros();
        let mut b_par = Vector3::zeros();
        let cost_par = SystemBuilder::new()
            .with_min_parallel_samples(16)
            .build(&jacobians, &residuals, &huber, &mut h_par, &mut b_par)
            .unwrap();

        assert!((h_seq - h_par).norm() < 1e-8);
        assert!((b_seq - b_par).norm() < 1e-8);
        assert!((cost_seq - cost_par).abs() < 1e-10);
    }

    #[test]
    fn test_cross_block() {
        let ja = [Matrix1x2::new(1.0, 2.0), Matrix1x2::new(0.0, 1.0)];
        let jb = [Matrix1x2::new(-1.0, 0.0), Matrix1x2::new(f64::NAN, 1.0)];
        let residuals = [Vector1::new(0.5), Vector1::new(0.5)];
        let mut block = Matrix2::zeros();

        let used = SystemBuilder::new()
            .build_cross(&ja, &jb, &residuals, &NoWeighting, &mut block)
            .unwrap();

        assert_eq!(used, 1);
        assert_eq!(block, Matrix2::new(-1.0, 0.0, -2.0, 0.0));
    }

    #[test]
    fn test_pair_blocks() {
        // r = x_b - x_a - z with J_a = -I, J_b = I
        let ja = [-Matrix2::identity(), -Matrix2::identity()];
        let jb = [Matrix2::identity(), Matrix2::identity()];
        let residuals = [Vector2::new(1.0, 2.0), Vector2::new(-1.0, 0.0)];

        let pair = SystemBuilder::new()
            .build_pair(&ja, &jb, &residuals, &NoWeighting)
            .unwrap();

        assert_eq!(pair.used, 2);
        assert_eq!(pair.h_aa, Matrix2::identity() * 2.0);
        assert_eq!(pair.h_bb, Matrix2::identity() * 2.0);
        assert_eq!(pair.h_ab, -Matrix2::identity() * 2.0);
        assert_eq!(pair.b_a, Vector2::new(0.0, -2.0));
        assert_eq!(pair.b_b, Vector2::new(0.0, 2.0));
        // (5 + 1) / 2
        assert!((pair.cost() - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_pair_sample_with_one_bad_jacobian_is_skipped_everywhere() {
        let ja = [-Matrix2::identity()];
        let jb = [Matrix2::new(1.0, f64::NAN, 0.0, 1.0)];
        let residuals = [Vector2::new(1.0, 2.0)];

        let pair = SystemBuilder::new()
            .build_pair(&ja, &jb, &residuals, &NoWeighting)
            .unwrap();

        assert_eq!(pair.used, 0);
        assert_eq!(pair.h_aa, Matrix2::zeros());
        assert_eq!(pair.b_a, Vector2::zeros());
        assert_eq!(pair.h_ab, Matrix2::zeros());
        assert_eq!(pair.squared_sum, 0.0);
        assert!(pair.cost().is_nan());
    }

    #[test]
    fn test_pair_weights_every_block() {
        let ja = [-Matrix2::identity()];
        let jb = [Matrix2::identity()];
        let residuals = [Vector2::new(4.0, 0.0)];
        let huber = HuberWeight::new(1.0).unwrap();

        let pair = SystemBuilder::new()
            .build_pair(&ja, &jb, &residuals, &huber)
            .unwrap();

        // w = 1 / 4 on all blocks, unweighted cost
        assert_eq!(pair.h_aa, Matrix2::identity() * 0.25);
        assert_eq!(pair.h_ab, -Matrix2::identity() * 0.25);
        assert_eq!(pair.b_b, Vector2::new(1.0, 0.0));
        assert!((pair.cost() - 16.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_is_finite_sample() {
        assert!(is_finite_sample(&Matrix1x2::new(1.0, 2.0), &Vector1::new(0.0)));
        assert!(!is_finite_sample(
            &Matrix1x2::new(1.0, f64::NEG_INFINITY),
            &Vector1::new(0.0)
        ));
        assert!(!is_finite_sample(&Matrix1x2::new(1.0, 2.0), &Vector1::new(f64::NAN)));
    }
}
