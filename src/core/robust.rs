//! Robust estimators (M-estimators) for down-weighting outlier measurements.
//!
//! In ordinary least squares every sample contributes `Jᵀ·J` and `Jᵀ·r` with the
//! same weight, so a single gross outlier can drag the solution away. A robust
//! estimator maps the squared residual norm `s = ||r||²` of a sample to a weight
//! `w(s)` in (0, 1], and the system builder accumulates `w·Jᵀ·J` and `w·Jᵀ·r`
//! instead (iteratively reweighted least squares).
//!
//! # Available estimators
//!
//! - [`NoWeighting`]: `w = 1`, recovers ordinary least squares
//! - [`HuberWeight`]: full weight for inliers, `δ/√s` beyond the threshold
//! - [`CauchyWeight`]: smooth `1 / (1 + s/c²)` decay
//! - [`GemanMcClureWeight`]: redescending `(c² / (c² + s))²`
//!
//! # Example
//!
//! ```
//! use gnsolve::core::robust::{HuberWeight, RobustEstimator};
//!
//! let huber = HuberWeight::new(1.345).unwrap();
//! assert_eq!(huber.weight(0.5), 1.0);
//! assert!(huber.weight(10.0) < 1.0);
//! ```

use crate::error::{SolverError, SolverResult};

/// Maps a squared residual norm to a down-weighting factor.
///
/// Implementations must be deterministic and side-effect free, and return a
/// value in (0, 1] for any finite, non-negative input. Scalar residuals pass `r²`.
pub trait RobustEstimator: Send + Sync {
    /// Weight of a sample whose residual has squared norm `squared_norm`.
    fn weight(&self, squared_norm: f64) -> f64;
}

impl<T: RobustEstimator + ?Sized> RobustEstimator for &T {
    fn weight(&self, squared_norm: f64) -> f64 {
        (**self).weight(squared_norm)
    }
}

impl<T: RobustEstimator + ?Sized> RobustEstimator for Box<T> {
    fn weight(&self, squared_norm: f64) -> f64 {
        (**self).weight(squared_norm)
    }
}

fn check_scale(scale: f64) -> SolverResult<f64> {
    if scale > 0.0 && scale.is_finite() {
        Ok(scale)
    } else {
        Err(SolverError::InvalidInput(format!(
            "robust estimator scale must be positive and finite, got {scale}"
        )))
    }
}

/// Ordinary least squares: every sample gets weight 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoWeighting;

impl RobustEstimator for NoWeighting {
    fn weight(&self, _squared_norm: f64) -> f64 {
        1.0
    }
}

/// Huber weighting.
///
/// ```text
/// w(s) = 1          if s ≤ δ²
///        δ / √s     otherwise
/// ```
///
/// `δ = 1.345` gives ~95% efficiency on Gaussian noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuberWeight {
    delta: f64,
    delta2: f64,
}

impl HuberWeight {
    pub fn new(delta: f64) -> SolverResult<Self> {
        let delta = check_scale(delta)?;
        Ok(Self {
            delta,
            delta2: delta * delta,
        })
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}

impl RobustEstimator for HuberWeight {
    fn weight(&self, squared_norm: f64) -> f64 {
        if squared_norm <= self.delta2 {
            1.0
        } else {
            (self.delta / squared_norm.sqrt()).max(f64::MIN_POSITIVE)
        }
    }
}

/// Cauchy (Lorentzian) weighting: `w(s) = 1 / (1 + s/c²)`.
///
/// Stronger suppression of large residuals than Huber; `c = 2.3849` is the
/// usual 95%-efficiency choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CauchyWeight {
    scale: f64,
    inv_scale2: f64,
}

impl CauchyWeight {
    pub fn new(scale: f64) -> SolverResult<Self> {
        let scale = check_scale(scale)?;
        Ok(Self {
            scale,
            inv_scale2: 1.0 / (scale * scale),
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl RobustEstimator for CauchyWeight {
    fn weight(&self, squared_norm: f64) -> f64 {
        (1.0 / (1.0 + squared_norm * self.inv_scale2)).max(f64::MIN_POSITIVE)
    }
}

/// Geman-McClure weighting: `w(s) = (c² / (c² + s))²`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemanMcClureWeight {
    scale: f64,
    scale2: f64,
}

impl GemanMcClureWeight {
    pub fn new(scale: f64) -> SolverResult<Self> {
        let scale = check_scale(scale)?;
        Ok(Self {
            scale,
            scale2: scale * scale,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl RobustEstimator for GemanMcClureWeight {
    fn weight(&self, squared_norm: f64) -> f64 {
        let ratio = self.scale2 / (self.scale2 + squared_norm);
        (ratio * ratio).max(f64::MIN_POSITIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 7] = [0.0, 1e-6, 0.25, 1.0, 4.0, 100.0, 1e12];

    fn assert_weight_range(estimator: &dyn RobustEstimator) {
        for s in SAMPLES {
            let w = estimator.weight(s);
            assert!(w > 0.0 && w <= 1.0, "weight({s}) = {w}");
        }
    }

    fn assert_non_increasing(estimator: &dyn RobustEstimator) {
        for pair in SAMPLES.windows(2) {
            assert!(estimator.weight(pair[1]) <= estimator.weight(pair[0]));
        }
    }

    #[test]
    fn test_no_weighting_is_constant() {
        for s in SAMPLES {
            assert_eq!(NoWeighting.weight(s), 1.0);
        }
    }

    #[test]
    fn test_huber_weight() {
        let huber = HuberWeight::new(2.0).unwrap();
        assert_eq!(huber.weight(3.9), 1.0);
        assert_eq!(huber.weight(4.0), 1.0);
        assert!((huber.weight(16.0) - 0.5).abs() < 1e-12);
        assert_weight_range(&huber);
        assert_non_increasing(&huber);
    }

    #[test]
    fn test_cauchy_weight() {
        let cauchy = CauchyWeight::new(1.0).unwrap();
        assert_eq!(cauchy.weight(0.0), 1.0);
        assert!((cauchy.weight(1.0) - 0.5).abs() < 1e-12);
        assert!((cauchy.weight(3.0) - 0.25).abs() < 1e-12);
        assert_weight_range(&cauchy);
        assert_non_increasing(&cauchy);
    }

    #[test]
    fn test_geman_mcclure_weight() {
        let gm = GemanMcClureWeight::new(1.0).unwrap();
        assert_eq!(gm.weight(0.0), 1.0);
        assert!((gm.weight(1.0) - 0.25).abs() < 1e-12);
        assert_weight_range(&gm);
        assert_non_increasing(&gm);
        assert!(gm.weight(100.0) < CauchyWeight::new(1.0).unwrap().weight(100.0));
    }

    #[test]
    fn test_invalid_scales_rejected() {
        assert!(HuberWeight::new(0.0).is_err());
        assert!(CauchyWeight::new(-1.0).is_err());
        assert!(GemanMcClureWeight::new(f64::NAN).is_err());
        assert!(matches!(
            HuberWeight::new(f64::INFINITY),
            Err(SolverError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_estimator_through_references() {
        let huber = HuberWeight::new(1.0).unwrap();
        let boxed: Box<dyn RobustEstimator> = Box::new(huber);
        assert_eq!(boxed.weight(4.0), (&huber).weight(4.0));
    }
}
