//! Stereo landmark reprojection cost functions for bundle adjustment.
//!
//! Both residuals observe a landmark through one camera of a rig mounted on
//! a moving body. With `T_orig_base = (t, ω)` the body pose and
//! `T_base_cam` the fixed rig extrinsic, the camera-frame point is
//!
//! ```text
//! X_c = Rᶜᵇ·(R(ω)ᵀ·(X − t)) + Pᶜᵇ
//! ```
//!
//! where `(Rᶜᵇ, Pᶜᵇ)` is the inverted rig extrinsic, precomputed at
//! construction.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};

use super::CostFunction;
use crate::camera::Camera;
use crate::geometry::{so3, Transform};

/// Reprojection residual with the observing pose bound by value.
///
/// Single parameter block: the landmark position. Used for observations from
/// the fixed prefix of the trajectory, and for seeding new landmarks from a
/// stereo pair.
pub struct ReprojectionErrorFixed {
    observed: Vector2<f64>,
    r_base_orig: Matrix3<f64>,
    p_base_orig: Vector3<f64>,
    r_cam_base: Matrix3<f64>,
    p_cam_base: Vector3<f64>,
    camera: Camera,
    block_sizes: [usize; 1],
}

impl ReprojectionErrorFixed {
    pub fn new(
        observed: Vector2<f64>,
        pose: &Transform,
        t_base_cam: &Transform,
        camera: Camera,
    ) -> Self {
        let (r_base_orig, p_base_orig) = pose.to_rot_trans_inv();
        let (r_cam_base, p_cam_base) = t_base_cam.to_rot_trans_inv();
        ReprojectionErrorFixed {
            observed,
            r_base_orig,
            p_base_orig,
            r_cam_base,
            p_cam_base,
            camera,
            block_sizes: [3],
        }
    }
}

impl CostFunction for ReprojectionErrorFixed {
    fn dim_residual(&self) -> usize {
        2
    }

    fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let x = Vector3::new(params[0][0], params[0][1], params[0][2]);
        let x_cam = self.r_cam_base * (self.r_base_orig * x + self.p_base_orig) + self.p_cam_base;
        let pixel = self.camera.project(&x_cam)?;
        let residuals =
            DVector::from_vec(vec![pixel.x - self.observed.x, pixel.y - self.observed.y]);

        let jacobian = compute_jacobian.then(|| {
            let j = self.camera.projection_jacobian(&x_cam);
            let dpdx = j * self.r_cam_base * self.r_base_orig;
            DMatrix::from_iterator(2, 3, dpdx.iter().copied())
        });
        Some((residuals, jacobian))
    }
}

/// Reprojection residual over a free landmark and a free pose.
///
/// Three parameter blocks: landmark `X[3]`, pose translation `t[3]` and pose
/// rotation `ω[3]`. The rig extrinsic is bound by value. Jacobians:
///
/// ```text
/// ∂r/∂X = J·Rᶜᵒ      ∂r/∂t = −J·Rᶜᵒ      ∂r/∂ω = J·[X_c]ₓ·Rᶜᵒ·L⁻¹(ω)
/// ```
///
/// with `Rᶜᵒ = Rᶜᵇ·R(ω)ᵀ` and `L⁻¹` the rotation-update matrix of
/// [`so3::rotation_update_inv`].
pub struct ReprojectionErrorStereo {
    observed: Vector2<f64>,
    r_cam_base: Matrix3<f64>,
    p_cam_base: Vector3<f64>,
    camera: Camera,
    block_sizes: [usize; 3],
}

impl ReprojectionErrorStereo {
    pub fn new(observed: Vector2<f64>, t_base_cam: &Transform, camera: Camera) -> Self {
        let (r_cam_base, p_cam_base) = t_base_cam.to_rot_trans_inv();
        ReprojectionErrorStereo {
            observed,
            r_cam_base,
            p_cam_base,
            camera,
            block_sizes: [3, 3, 3],
        }
    }
}

impl CostFunction for ReprojectionErrorStereo {
    fn dim_residual(&self) -> usize {
        2
    }

    fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let x = Vector3::new(params[0][0], params[0][1], params[0][2]);
        let t = Vector3::new(params[1][0], params[1][1], params[1][2]);
        let omega = Vector3::new(params[2][0], params[2][1], params[2][2]);

        let r_base_orig = so3::rodrigues(&omega).transpose();
        let x_cam = self.r_cam_base * (r_base_orig * (x - t)) + self.p_cam_base;
        let pixel = self.camera.project(&x_cam)?;
        let residuals =
            DVector::from_vec(vec![pixel.x - self.observed.x, pixel.y - self.observed.y]);

        let jacobian = compute_jacobian.then(|| {
            let j = self.camera.projection_jacobian(&x_cam);
            let r_cam_orig = self.r_cam_base * r_base_orig;
            let dpdx = j * r_cam_orig;
            let dpdt = -dpdx;
            let dpdw = j * so3::hat(&x_cam) * r_cam_orig * so3::rotation_update_inv(&omega);

            let mut jac = DMatrix::zeros(2, 9);
            jac.view_mut((0, 0), (2, 3)).copy_from(&dpdx);
            jac.view_mut((0, 3), (2, 3)).copy_from(&dpdt);
            jac.view_mut((0, 6), (2, 3)).copy_from(&dpdw);
            jac
        });
        Some((residuals, jacobian))
    }
}
