//! Camera projection models.
//!
//! A [`Camera`] owns a contiguous intrinsic parameter vector together with a
//! [`Projector`] describing the projection function. Cost functions bind the
//! parameter vector as a solver block and evaluate the projector at candidate
//! parameter values, so the projector itself is stateless: every operation
//! takes the parameters explicitly.
//!
//! The omnidirectional Mei model ([`mei::MeiProjector`]) is the reference
//! instance.

use std::fmt;
use std::sync::Arc;

use nalgebra::{Matrix2x3, Matrix2xX, Vector2, Vector3};

pub mod mei;

/// Pixel value written into batch-projection slots whose point did not
/// project; callers mask these entries separately.
pub const INVALID_PIXEL: f64 = 1e6;

/// A camera projection function with analytic derivatives.
///
/// All operations take the intrinsic parameters explicitly so a single
/// projector instance can be evaluated at candidate parameter vectors during
/// calibration.
pub trait Projector: Send + Sync + fmt::Debug {
    /// Number of intrinsic parameters.
    fn param_count(&self) -> usize;

    /// Projects a camera-frame 3D point to pixel coordinates.
    ///
    /// Returns `None` iff the point lies behind the model's valid hemisphere
    /// or the projection is non-finite.
    fn project(&self, params: &[f64], point: &Vector3<f64>) -> Option<Vector2<f64>>;

    /// Analytic Jacobian ∂(u,v)/∂(x,y,z) at a point that projects validly.
    fn projection_jacobian(&self, params: &[f64], point: &Vector3<f64>) -> Matrix2x3<f64>;

    /// Analytic Jacobian ∂(u,v)/∂params at a point that projects validly.
    fn intrinsics_jacobian(&self, params: &[f64], point: &Vector3<f64>) -> Matrix2xX<f64>;

    /// Lifts a pixel to a unit-norm ray on the model's projection surface.
    fn unproject(&self, params: &[f64], pixel: &Vector2<f64>) -> Option<Vector3<f64>>;
}

/// A camera: an immutable parameter vector plus its projector.
#[derive(Debug, Clone)]
pub struct Camera {
    params: Vec<f64>,
    projector: Arc<dyn Projector>,
}

impl Camera {
    /// Create a camera from a projector and its parameter vector.
    ///
    /// # Panics
    ///
    /// Panics if the parameter count does not match the projector.
    pub fn new(projector: Arc<dyn Projector>, params: &[f64]) -> Self {
        assert_eq!(
            params.len(),
            projector.param_count(),
            "parameter vector length does not match the projector"
        );
        Camera {
            params: params.to_vec(),
            projector,
        }
    }

    /// Convenience constructor for the Mei model with parameters
    /// `[ξ, k, fu, fv, u0, v0]`.
    pub fn mei(params: &[f64; 6]) -> Self {
        Camera::new(Arc::new(mei::MeiProjector), params)
    }

    /// Read-only view of the parameter vector.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Replace the parameter vector (calibration write-back).
    pub fn set_params(&mut self, params: &[f64]) {
        assert_eq!(params.len(), self.params.len());
        self.params.copy_from_slice(params);
    }

    /// The projector.
    pub fn projector(&self) -> Arc<dyn Projector> {
        Arc::clone(&self.projector)
    }

    /// Projects a camera-frame point at the owned parameters.
    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        self.projector.project(&self.params, point)
    }

    /// Jacobian ∂(u,v)/∂(x,y,z) at the owned parameters.
    pub fn projection_jacobian(&self, point: &Vector3<f64>) -> Matrix2x3<f64> {
        self.projector.projection_jacobian(&self.params, point)
    }

    /// Lifts a pixel to a unit ray at the owned parameters.
    pub fn unproject(&self, pixel: &Vector2<f64>) -> Option<Vector3<f64>> {
        self.projector.unproject(&self.params, pixel)
    }

    /// Batched projection.
    ///
    /// `dst` is resized to `|src|`; points that do not project keep their slot
    /// with the [`INVALID_PIXEL`] sentinel. The returned mask marks valid
    /// entries.
    pub fn project_point_cloud(&self, src: &[Vector3<f64>], dst: &mut Vec<Vector2<f64>>) -> Vec<bool> {
        let mut mask = vec![false; src.len()];
        dst.clear();
        dst.reserve(src.len());
        for (i, point) in src.iter().enumerate() {
            match self.project(point) {
                Some(pixel) => {
                    mask[i] = true;
                    dst.push(pixel);
                }
                None => dst.push(Vector2::new(INVALID_PIXEL, INVALID_PIXEL)),
            }
        }
        mask
    }

    /// Batched unprojection: lifts every pixel to a unit ray.
    ///
    /// Pixels that cannot be lifted keep their slot with a zero ray; the
    /// returned mask marks valid entries.
    pub fn reconstruct_point_cloud(
        &self,
        src: &[Vector2<f64>],
        dst: &mut Vec<Vector3<f64>>,
    ) -> Vec<bool> {
        let mut mask = vec![false; src.len()];
        dst.clear();
        dst.reserve(src.len());
        for (i, pixel) in src.iter().enumerate() {
            match self.unproject(pixel) {
                Some(ray) => {
                    mask[i] = true;
                    dst.push(ray);
                }
                None => dst.push(Vector3::zeros()),
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_point_cloud_keeps_slots() {
        let camera = Camera::mei(&[0.5, 0.1, 500.0, 500.0, 320.0, 240.0]);
        let src = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0), // behind the valid hemisphere
            Vector3::new(0.1, 0.1, 2.0),
        ];
        let mut dst = Vec::new();
        let mask = camera.project_point_cloud(&src, &mut dst);
        assert_eq!(dst.len(), 3);
        assert_eq!(mask, vec![true, false, true]);
        assert_eq!(dst[1].x, INVALID_PIXEL);
    }

    #[test]
    fn test_reconstruct_point_cloud_rays_are_unit() {
        let camera = Camera::mei(&[0.8, 0.05, 450.0, 450.0, 320.0, 240.0]);
        let src = vec![
            Vector2::new(320.0, 240.0),
            Vector2::new(400.0, 300.0),
            Vector2::new(100.0, 50.0),
        ];
        let mut rays = Vec::new();
        let mask = camera.reconstruct_point_cloud(&src, &mut rays);
        for (ray, ok) in rays.iter().zip(&mask) {
            if *ok {
                assert!((ray.norm() - 1.0).abs() < 1e-12);
            }
        }
        assert!(mask[0]);
    }

    #[test]
    #[should_panic(expected = "parameter vector length")]
    fn test_camera_rejects_wrong_parameter_count() {
        Camera::new(Arc::new(mei::MeiProjector), &[0.5, 1.0, 500.0]);
    }
}
