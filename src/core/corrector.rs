//! Residual and Jacobian rescaling for robust losses.
//!
//! Given ρ(s) evaluated at s = ‖r‖², the corrector rescales residuals and
//! Jacobians so that the Gauss-Newton approximation of the robustified cost
//! matches the one of the rescaled plain least-squares problem (Triggs'
//! correction). The Jacobian must be corrected before the residuals, since
//! the rank-one term uses the uncorrected residual vector.

use nalgebra::{DMatrix, DVector};

pub struct Corrector {
    sqrt_rho1: f64,
    residual_scaling: f64,
    alpha_sq_norm: f64,
}

impl Corrector {
    /// `sq_norm` is the squared residual norm the loss was evaluated at;
    /// `rho` is `[ρ, ρ′, ρ″]`.
    pub fn new(sq_norm: f64, rho: &[f64; 3]) -> Self {
        let sqrt_rho1 = rho[1].max(0.0).sqrt();

        if sq_norm == 0.0 || rho[2] <= 0.0 {
            return Corrector {
                sqrt_rho1,
                residual_scaling: sqrt_rho1,
                alpha_sq_norm: 0.0,
            };
        }

        // solve the Triggs quadratic for alpha
        let d = 1.0 + 2.0 * sq_norm * rho[2] / rho[1];
        let alpha = 1.0 - d.max(0.0).sqrt();
        Corrector {
            sqrt_rho1,
            residual_scaling: sqrt_rho1 / (1.0 - alpha),
            alpha_sq_norm: alpha / sq_norm,
        }
    }

    pub fn correct_jacobian(&self, residuals: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        if self.alpha_sq_norm == 0.0 {
            *jacobian *= self.sqrt_rho1;
            return;
        }
        let rt_j = residuals.transpose() * &*jacobian;
        *jacobian -= residuals * rt_j * self.alpha_sq_norm;
        *jacobian *= self.sqrt_rho1;
    }

    pub fn correct_residuals(&self, residuals: &mut DVector<f64>) {
        *residuals *= self.residual_scaling;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_loss_leaves_everything_unchanged() {
        // rho(s) = s has rho' = 1, rho'' = 0
        let mut residuals = DVector::from_vec(vec![1.0, -2.0]);
        let mut jacobian = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, -0.25, 2.0]);
        let expected_r = residuals.clone();
        let expected_j = jacobian.clone();

        let corrector = Corrector::new(residuals.norm_squared(), &[5.0, 1.0, 0.0]);
        corrector.correct_jacobian(&residuals, &mut jacobian);
        corrector.correct_residuals(&mut residuals);
        assert!((residuals - expected_r).amax() < 1e-15);
        assert!((jacobian - expected_j).amax() < 1e-15);
    }

    #[test]
    fn test_corrected_residual_norm_approximates_rho() {
        // after correction, ‖r‖² should equal ρ(s) up to the Triggs
        // approximation for a loss with negative curvature
        let residuals = DVector::from_vec(vec![3.0, 4.0]);
        let s: f64 = residuals.norm_squared(); // 25
        let rho: [f64; 3] = [((1.0f64) + s).ln(), 1.0 / (1.0 + s), -1.0 / ((1.0 + s) * (1.0 + s))];
        let corrector = Corrector::new(s, &rho);
        let mut corrected = residuals.clone();
        corrector.correct_residuals(&mut corrected);
        // exact identity would need ρ itself; the corrector only matches the
        // first-order model, so check the scaling is strictly shrinking
        assert!(corrected.norm_squared() < s);
        assert!(corrected.norm_squared() > 0.0);
    }
}
