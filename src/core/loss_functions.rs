//! Robust loss functions for outlier rejection.
//!
//! With a robust loss ρ(s) the cost of a residual block becomes ρ(‖r‖²)
//! instead of ‖r‖². The [`Loss`] trait evaluates the cost together with its
//! first two derivatives; the [`Corrector`](super::corrector::Corrector)
//! turns them into a rescaling of the residuals and Jacobians so the
//! optimization proceeds as a reweighted least-squares problem.

use crate::error::{Error, Result};

/// A robust loss function.
///
/// `evaluate` receives the squared residual norm `s = ‖r‖²` and returns
/// `[ρ(s), ρ′(s), ρ″(s)]`. Near zero a loss behaves like plain least squares:
/// ρ(0) = 0, ρ′(0) = 1.
pub trait Loss: Send + Sync {
    fn evaluate(&self, s: f64) -> [f64; 3];
}

/// Huber loss: quadratic for inliers, linear for outliers.
///
/// ```text
/// ρ(s) = s                   if s ≤ δ²
///      = 2δ√s − δ²           if s > δ²
/// ```
#[derive(Debug, Clone)]
pub struct HuberLoss {
    scale2: f64,
    scale: f64,
}

impl HuberLoss {
    pub fn new(scale: f64) -> Result<Self> {
        if scale <= 0.0 {
            return Err(Error::InvalidInput(
                "loss scale must be larger than zero".to_string(),
            ));
        }
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl Loss for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            let r = s.sqrt();
            let rho1 = (self.scale / r).max(f64::MIN);
            [2.0 * self.scale * r - self.scale2, rho1, -rho1 / (2.0 * s)]
        } else {
            [s, 1.0, 0.0]
        }
    }
}

/// Cauchy loss: logarithmic growth, aggressive outlier suppression.
///
/// ```text
/// ρ(s)  = b·ln(1 + s/b)          with b = δ²
/// ρ′(s) = 1/(1 + s/b)
/// ρ″(s) = −(1/b)/(1 + s/b)²
/// ```
///
/// With δ = 1 this is the plain `ρ(s) = ln(1 + s)` used for the per-view
/// grid initialization.
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    b: f64,
    inv_b: f64,
}

impl CauchyLoss {
    pub fn new(scale: f64) -> Result<Self> {
        if scale <= 0.0 {
            return Err(Error::InvalidInput(
                "loss scale must be larger than zero".to_string(),
            ));
        }
        let b = scale * scale;
        Ok(CauchyLoss { b, inv_b: 1.0 / b })
    }
}

impl Loss for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        let sum = 1.0 + s * self.inv_b;
        let inv = 1.0 / sum;
        [self.b * sum.ln(), inv.max(f64::MIN), -self.inv_b * inv * inv]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huber_inlier_region_is_quadratic() {
        let huber = HuberLoss::new(1.345).unwrap();
        let [rho, rho1, rho2] = huber.evaluate(0.5);
        assert_eq!(rho, 0.5);
        assert_eq!(rho1, 1.0);
        assert_eq!(rho2, 0.0);
    }

    #[test]
    fn test_huber_outlier_region_downweights() {
        let huber = HuberLoss::new(1.0).unwrap();
        let [rho, rho1, _] = huber.evaluate(9.0);
        assert!((rho - 5.0).abs() < 1e-12); // 2·1·3 − 1
        assert!((rho1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cauchy_unit_scale_is_log1p() {
        let cauchy = CauchyLoss::new(1.0).unwrap();
        for s in [0.0, 0.1, 1.0, 25.0] {
            let [rho, rho1, _] = cauchy.evaluate(s);
            assert!((rho - (1.0 + s).ln()).abs() < 1e-12);
            assert!((rho1 - 1.0 / (1.0 + s)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cauchy_derivative_consistency() {
        let cauchy = CauchyLoss::new(2.0).unwrap();
        let eps = 1e-6;
        for s in [0.5, 3.0, 40.0] {
            let [_, rho1, rho2] = cauchy.evaluate(s);
            let [rho_p, rho1_p, _] = cauchy.evaluate(s + eps);
            let [rho_m, rho1_m, _] = cauchy.evaluate(s - eps);
            assert!(((rho_p - rho_m) / (2.0 * eps) - rho1).abs() < 1e-6);
            assert!(((rho1_p - rho1_m) / (2.0 * eps) - rho2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_invalid_scale_rejected() {
        assert!(HuberLoss::new(0.0).is_err());
        assert!(CauchyLoss::new(-1.0).is_err());
    }
}
