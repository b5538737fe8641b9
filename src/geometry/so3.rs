//! SO(3) helpers on the axis-angle parameterization.
//!
//! These are the building blocks shared by [`super::Transform`] and the
//! analytic Jacobians of the reprojection cost functions: the Rodrigues
//! formula and its inverse, the left Jacobian of the exponential map, and the
//! rotation-update matrix used by the pose residuals.

use nalgebra::{Matrix3, Vector3};

/// Threshold below which angle-dependent coefficients switch to their series
/// expansion.
const SMALL_ANGLE: f64 = 1e-4;

/// Numerically stable sinc(x) = sin(x)/x with sinc(0) = 1.
#[inline]
pub fn sinc(x: f64) -> f64 {
    if x.abs() < SMALL_ANGLE {
        let x2 = x * x;
        1.0 - x2 / 6.0 + x2 * x2 / 120.0
    } else {
        x.sin() / x
    }
}

/// Cross-product matrix `[v]ₓ` such that `[v]ₓ w = v × w`.
#[inline]
pub fn hat(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Stable (1 - cos θ)/θ² via the half-angle identity.
#[inline]
fn one_minus_cos_over_sq(theta: f64) -> f64 {
    let s = sinc(0.5 * theta);
    0.5 * s * s
}

/// Rodrigues formula: axis-angle vector to rotation matrix.
///
/// `R = I + sinc(θ)·ω̂ + (1−cos θ)/θ²·ω̂²` with both coefficients evaluated
/// through their stable branches, so ω = 0 maps exactly to the identity.
pub fn rodrigues(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = hat(omega);
    Matrix3::identity() + w * sinc(theta) + w * w * one_minus_cos_over_sq(theta)
}

/// Inverse of [`rodrigues`]: rotation matrix to axis-angle vector with
/// magnitude in `[0, π]`.
///
/// Handles θ ≈ 0 through the antisymmetric part alone and θ ≈ π through the
/// symmetric part (largest-diagonal axis extraction), where the antisymmetric
/// part loses precision.
pub fn log_rotation(r: &Matrix3<f64>) -> Vector3<f64> {
    let cos_theta = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    // vee(R - Rᵀ) = 2 sin θ · û
    let vee = Vector3::new(
        r[(2, 1)] - r[(1, 2)],
        r[(0, 2)] - r[(2, 0)],
        r[(1, 0)] - r[(0, 1)],
    );

    if theta < SMALL_ANGLE {
        // sin θ ≈ θ: ω ≈ vee/2 with a second-order correction
        return vee * 0.5 * (1.0 + theta * theta / 6.0);
    }

    let sin_theta = theta.sin();
    if sin_theta > 1e-6 {
        return vee * (theta / (2.0 * sin_theta));
    }

    // θ ≈ π: R + I = (1 + cos θ)I + (1 − cos θ)ûûᵀ + sin θ·[û]ₓ, so the
    // diagonal carries the squared axis components.
    let one_minus = 1.0 - cos_theta;
    let diag = Vector3::new(r[(0, 0)], r[(1, 1)], r[(2, 2)]);
    let k = diag.imax();
    let mut axis = Vector3::zeros();
    axis[k] = ((diag[k] - cos_theta) / one_minus).max(0.0).sqrt();
    let i = (k + 1) % 3;
    let j = (k + 2) % 3;
    axis[i] = (r[(k, i)] + r[(i, k)]) / (2.0 * one_minus * axis[k]);
    axis[j] = (r[(k, j)] + r[(j, k)]) / (2.0 * one_minus * axis[k]);
    axis.normalize_mut();
    // the antisymmetric part still fixes the sign when it has not vanished
    if vee.dot(&axis) < 0.0 {
        axis = -axis;
    }
    axis * theta
}

/// Left Jacobian of the SO(3) exponential map at ω.
///
/// `J_l(ω) = I + (1−cos θ)/θ²·ω̂ + (θ−sin θ)/θ³·ω̂²`, so that the derivative
/// of `R(ω)·X` with respect to an additive perturbation of ω is
/// `−[R(ω)X]ₓ · J_l(ω)`.
pub fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = hat(omega);
    let b = one_minus_cos_over_sq(theta);
    let c = if theta < SMALL_ANGLE {
        let t2 = theta * theta;
        1.0 / 6.0 - t2 / 120.0
    } else {
        (theta - theta.sin()) / (theta * theta * theta)
    };
    Matrix3::identity() + w * b + w * w * c
}

/// Rotation-update matrix used by the stereo and odometry residuals.
///
/// `L⁻¹(ω) = I + (θ/2)·sinc(θ/2)·û + (1 − sinc θ)·û²` with `û = [ω/θ]ₓ`,
/// and exactly the identity at θ = 0.
pub fn rotation_update_inv(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    if theta == 0.0 {
        return Matrix3::identity();
    }
    let u = hat(&(omega / theta));
    Matrix3::identity()
        + u * (0.5 * theta * sinc(0.5 * theta))
        + u * u * (1.0 - sinc(theta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mat_approx_eq(a: &Matrix3<f64>, b: &Matrix3<f64>, eps: f64) {
        for r in 0..3 {
            for c in 0..3 {
                assert!(
                    (a[(r, c)] - b[(r, c)]).abs() < eps,
                    "entry ({r}, {c}): {} vs {}",
                    a[(r, c)],
                    b[(r, c)]
                );
            }
        }
    }

    #[test]
    fn test_sinc_limits() {
        assert_eq!(sinc(0.0), 1.0);
        assert!((sinc(1e-8) - 1.0).abs() < 1e-15);
        assert!((sinc(1.0) - 1.0f64.sin()).abs() < 1e-15);
    }

    #[test]
    fn test_hat_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let w = Vector3::new(-0.5, 4.0, 0.25);
        assert!((hat(&v) * w - v.cross(&w)).norm() < 1e-12);
    }

    #[test]
    fn test_rodrigues_identity_at_zero() {
        let r = rodrigues(&Vector3::zeros());
        assert_mat_approx_eq(&r, &Matrix3::identity(), 0.0);
    }

    #[test]
    fn test_rodrigues_quarter_turn() {
        let r = rodrigues(&Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        let x = r * Vector3::new(1.0, 0.0, 0.0);
        assert!((x - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-14);
    }

    #[test]
    fn test_log_rotation_round_trip() {
        let cases = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1e-9, -2e-9, 1e-9),
            Vector3::new(0.1, -0.2, 0.3),
            Vector3::new(-1.2, 0.7, 0.4),
            Vector3::new(2.0, 1.5, -1.0),
            Vector3::new(3.1, 0.05, 0.05),
        ];
        for omega in cases {
            let back = log_rotation(&rodrigues(&omega));
            assert!(
                (back - omega).norm() < 1e-10,
                "round trip failed for {omega:?}: got {back:?}"
            );
        }
    }

    #[test]
    fn test_log_rotation_near_pi() {
        let omega = Vector3::new(0.0, std::f64::consts::PI - 1e-8, 0.0);
        let back = log_rotation(&rodrigues(&omega));
        assert!((back.norm() - omega.norm()).abs() < 1e-7);
        assert!((back.normalize() - omega.normalize()).norm() < 1e-5);
    }

    #[test]
    fn test_left_jacobian_at_zero() {
        assert_mat_approx_eq(
            &left_jacobian(&Vector3::zeros()),
            &Matrix3::identity(),
            0.0,
        );
    }

    #[test]
    fn test_left_jacobian_matches_finite_difference() {
        // d(R(ω)X)/dω = −[R(ω)X]ₓ · J_l(ω)
        let omega = Vector3::new(0.3, -0.5, 0.2);
        let x = Vector3::new(0.7, 1.1, -0.4);
        let analytic = -hat(&(rodrigues(&omega) * x)) * left_jacobian(&omega);
        let eps = 1e-7;
        for i in 0..3 {
            let mut plus = omega;
            let mut minus = omega;
            plus[i] += eps;
            minus[i] -= eps;
            let d = (rodrigues(&plus) * x - rodrigues(&minus) * x) / (2.0 * eps);
            for r in 0..3 {
                assert!(
                    (analytic[(r, i)] - d[r]).abs() < 1e-6,
                    "mismatch at ({r}, {i}): {} vs {}",
                    analytic[(r, i)],
                    d[r]
                );
            }
        }
    }

    #[test]
    fn test_rotation_update_inv_identity_at_zero() {
        let l = rotation_update_inv(&Vector3::zeros());
        assert_eq!(l, Matrix3::identity());
    }

    #[test]
    fn test_rotation_update_inv_small_angle_is_near_identity() {
        let l = rotation_update_inv(&Vector3::new(1e-6, -1e-6, 1e-6));
        assert_mat_approx_eq(&l, &Matrix3::identity(), 1e-5);
    }
}
