//! Omnidirectional Mei camera model.
//!
//! The model projects a point onto the unit sphere, shifts the projection
//! center by the mirror parameter ξ along the optical axis, and applies a
//! pinhole projection with a single radial distortion term k:
//!
//! ```text
//! ρ  = |X|                    η  = z + ξ·ρ
//! xₙ = x/η                    yₙ = y/η
//! r² = xₙ² + yₙ²              d  = 1 + k·r²
//! u  = fu·d·xₙ + u0           v  = fv·d·yₙ + v0
//! ```
//!
//! Parameter order is `[ξ, k, fu, fv, u0, v0]`. With ξ = 0 and k = 0 the
//! model reduces to a plain pinhole camera.

use nalgebra::{Matrix2x3, Matrix2xX, Vector2, Vector3};

use super::Projector;

/// Denominator threshold below which a projection is rejected.
const MIN_DENOM: f64 = 1e-6;

/// The Mei single-sphere projector.
///
/// Stateless: parameters are supplied per call, which lets the calibration
/// engine evaluate candidate intrinsics without rebuilding cameras.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeiProjector;

impl MeiProjector {
    /// Number of intrinsic parameters.
    pub const PARAM_COUNT: usize = 6;

    /// Hemisphere bound: points with `z ≤ −w·ρ` are behind the mirror's
    /// valid field of view. For ξ = 0 this degenerates to requiring z > 0.
    fn hemisphere_bound(xi: f64) -> f64 {
        if xi <= 1.0 { xi } else { 1.0 / xi }
    }
}

impl Projector for MeiProjector {
    fn param_count(&self) -> usize {
        Self::PARAM_COUNT
    }

    fn project(&self, params: &[f64], point: &Vector3<f64>) -> Option<Vector2<f64>> {
        let (xi, k, fu, fv, u0, v0) = (
            params[0], params[1], params[2], params[3], params[4], params[5],
        );
        let (x, y, z) = (point.x, point.y, point.z);

        let rho = (x * x + y * y + z * z).sqrt();
        let eta = z + xi * rho;
        if eta < MIN_DENOM || z <= -Self::hemisphere_bound(xi) * rho {
            return None;
        }

        let xn = x / eta;
        let yn = y / eta;
        let r2 = xn * xn + yn * yn;
        let d = 1.0 + k * r2;

        let pixel = Vector2::new(fu * d * xn + u0, fv * d * yn + v0);
        if pixel.x.is_finite() && pixel.y.is_finite() {
            Some(pixel)
        } else {
            None
        }
    }

    fn projection_jacobian(&self, params: &[f64], point: &Vector3<f64>) -> Matrix2x3<f64> {
        let (xi, k, fu, fv) = (params[0], params[1], params[2], params[3]);
        let (x, y, z) = (point.x, point.y, point.z);

        let rho = (x * x + y * y + z * z).sqrt();
        let eta = z + xi * rho;
        if rho < MIN_DENOM || eta.abs() < MIN_DENOM {
            return Matrix2x3::zeros();
        }

        let xn = x / eta;
        let yn = y / eta;
        let r2 = xn * xn + yn * yn;
        let d = 1.0 + k * r2;

        // ∂η/∂X
        let g = Vector3::new(xi * x / rho, xi * y / rho, 1.0 + xi * z / rho);

        // ∂xₙ/∂X = eₓ/η − (x/η²)·∂η/∂X, same for yₙ
        let dxn = Vector3::new(1.0 / eta, 0.0, 0.0) - g * (x / (eta * eta));
        let dyn_ = Vector3::new(0.0, 1.0 / eta, 0.0) - g * (y / (eta * eta));

        // ∂r²/∂X
        let dr2 = dxn * (2.0 * xn) + dyn_ * (2.0 * yn);

        let du = (dxn * d + dr2 * (k * xn)) * fu;
        let dv = (dyn_ * d + dr2 * (k * yn)) * fv;

        Matrix2x3::new(du.x, du.y, du.z, dv.x, dv.y, dv.z)
    }

    fn intrinsics_jacobian(&self, params: &[f64], point: &Vector3<f64>) -> Matrix2xX<f64> {
        let (xi, k, fu, fv) = (params[0], params[1], params[2], params[3]);
        let (x, y, z) = (point.x, point.y, point.z);

        let rho = (x * x + y * y + z * z).sqrt();
        let eta = z + xi * rho;
        let mut jac = Matrix2xX::zeros(Self::PARAM_COUNT);
        if eta.abs() < MIN_DENOM {
            return jac;
        }

        let xn = x / eta;
        let yn = y / eta;
        let r2 = xn * xn + yn * yn;
        let d = 1.0 + k * r2;

        // ∂η/∂ξ = ρ, hence ∂xₙ/∂ξ = −xₙ·ρ/η and ∂r²/∂ξ = −2r²·ρ/η
        let s = -rho / eta;
        jac[(0, 0)] = fu * xn * s * (d + 2.0 * k * r2);
        jac[(1, 0)] = fv * yn * s * (d + 2.0 * k * r2);

        jac[(0, 1)] = fu * xn * r2;
        jac[(1, 1)] = fv * yn * r2;

        jac[(0, 2)] = d * xn;
        jac[(1, 3)] = d * yn;

        jac[(0, 4)] = 1.0;
        jac[(1, 5)] = 1.0;

        jac
    }

    fn unproject(&self, params: &[f64], pixel: &Vector2<f64>) -> Option<Vector3<f64>> {
        let (xi, k, fu, fv, u0, v0) = (
            params[0], params[1], params[2], params[3], params[4], params[5],
        );

        let mu = (pixel.x - u0) / fu;
        let mv = (pixel.y - v0) / fv;
        let rd = (mu * mu + mv * mv).sqrt();

        // undo the radial term: r_d = r·(1 + k·r²), solved by fixed point
        let mut r = rd;
        for _ in 0..10 {
            let denom = 1.0 + k * r * r;
            if denom.abs() < MIN_DENOM {
                return None;
            }
            r = rd / denom;
        }
        let (xn, yn) = if rd > 0.0 {
            (mu * r / rd, mv * r / rd)
        } else {
            (mu, mv)
        };

        // lift the normalized point back onto the unit sphere
        let r2 = xn * xn + yn * yn;
        let disc = 1.0 + (1.0 - xi * xi) * r2;
        if disc < 0.0 {
            return None;
        }
        let factor = (xi + disc.sqrt()) / (1.0 + r2);
        let ray = Vector3::new(factor * xn, factor * yn, factor - xi);
        let norm = ray.norm();
        if norm < MIN_DENOM || !norm.is_finite() {
            return None;
        }
        Some(ray / norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: [f64; 6] = [0.7, 0.12, 420.0, 415.0, 640.0, 480.0];

    fn assert_approx_eq(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() < eps, "values {a} and {b} differ by more than {eps}");
    }

    #[test]
    fn test_pinhole_degeneration() {
        // ξ = 0, k = 0 is a plain pinhole: the optical axis hits the
        // principal point and the Jacobian there is diag(fu, fv) padded.
        let projector = MeiProjector;
        let params = [0.0, 0.0, 500.0, 500.0, 500.0, 500.0];
        let point = Vector3::new(0.0, 0.0, 1.0);

        let pixel = projector.project(&params, &point).unwrap();
        assert_approx_eq(pixel.x, 500.0, 1e-12);
        assert_approx_eq(pixel.y, 500.0, 1e-12);

        let jac = projector.projection_jacobian(&params, &point);
        let expected = Matrix2x3::new(500.0, 0.0, 0.0, 0.0, 500.0, 0.0);
        for r in 0..2 {
            for c in 0..3 {
                assert_approx_eq(jac[(r, c)], expected[(r, c)], 1e-9);
            }
        }
    }

    #[test]
    fn test_point_behind_camera_is_rejected() {
        let projector = MeiProjector;
        let pinhole = [0.0, 0.0, 500.0, 500.0, 500.0, 500.0];
        assert!(projector
            .project(&pinhole, &Vector3::new(0.1, 0.1, -1.0))
            .is_none());
        // a wide mirror accepts points slightly behind the sensor plane
        let wide = [0.9, 0.0, 500.0, 500.0, 500.0, 500.0];
        assert!(projector
            .project(&wide, &Vector3::new(1.0, 0.0, -0.1))
            .is_some());
    }

    #[test]
    fn test_projection_jacobian_matches_central_differences() {
        let projector = MeiProjector;
        let points = [
            Vector3::new(0.1, 0.2, 1.0),
            Vector3::new(-0.4, 0.3, 2.0),
            Vector3::new(0.8, -0.6, 1.5),
        ];
        let eps = 1e-6;
        for point in points {
            let jac = projector.projection_jacobian(&PARAMS, &point);
            for i in 0..3 {
                let mut plus = point;
                let mut minus = point;
                plus[i] += eps;
                minus[i] -= eps;
                let p_plus = projector.project(&PARAMS, &plus).unwrap();
                let p_minus = projector.project(&PARAMS, &minus).unwrap();
                let num = (p_plus - p_minus) / (2.0 * eps);
                for r in 0..2 {
                    assert!(
                        (jac[(r, i)] - num[r]).abs() < 1e-6,
                        "mismatch at ({r}, {i}): {} vs {}",
                        jac[(r, i)],
                        num[r]
                    );
                }
            }
        }
    }

    #[test]
    fn test_intrinsics_jacobian_matches_central_differences() {
        let projector = MeiProjector;
        let point = Vector3::new(0.3, -0.2, 1.2);
        let jac = projector.intrinsics_jacobian(&PARAMS, &point);
        let eps = 1e-6;
        for i in 0..6 {
            let mut plus = PARAMS;
            let mut minus = PARAMS;
            plus[i] += eps;
            minus[i] -= eps;
            let p_plus = projector.project(&plus, &point).unwrap();
            let p_minus = projector.project(&minus, &point).unwrap();
            let num = (p_plus - p_minus) / (2.0 * eps);
            for r in 0..2 {
                assert!(
                    (jac[(r, i)] - num[r]).abs() < 1e-5,
                    "mismatch at ({r}, {i}): {} vs {}",
                    jac[(r, i)],
                    num[r]
                );
            }
        }
    }

    #[test]
    fn test_unproject_round_trip() {
        let projector = MeiProjector;
        let points = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, -0.1, 0.8),
            Vector3::new(-0.5, 0.4, 1.3),
        ];
        for point in points {
            let pixel = projector.project(&PARAMS, &point).unwrap();
            let ray = projector.unproject(&PARAMS, &pixel).unwrap();
            assert_approx_eq(ray.norm(), 1.0, 1e-12);
            // the recovered ray must be parallel to the original point
            let cosine = ray.dot(&point) / point.norm();
            assert_approx_eq(cosine, 1.0, 1e-9);
        }
    }

    #[test]
    fn test_unproject_center_is_optical_axis() {
        let projector = MeiProjector;
        let ray = projector
            .unproject(&PARAMS, &Vector2::new(640.0, 480.0))
            .unwrap();
        assert!((ray - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);
    }
}
