//! Pose-only reprojection cost for the odometry estimator.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};

use super::CostFunction;
use crate::camera::Camera;
use crate::geometry::{so3, Transform};

/// Reprojection residual of one known landmark observed from a free pose.
///
/// Two parameter blocks: pose translation `t[3]` and pose rotation `ω[3]`.
/// The landmark and the rig extrinsic are bound by value. Same Jacobian
/// skeleton as [`super::ReprojectionErrorStereo`] minus the landmark block.
pub struct OdometryError {
    landmark: Vector3<f64>,
    observed: Vector2<f64>,
    r_cam_base: Matrix3<f64>,
    p_cam_base: Vector3<f64>,
    camera: Camera,
    block_sizes: [usize; 2],
}

impl OdometryError {
    pub fn new(
        landmark: Vector3<f64>,
        observed: Vector2<f64>,
        t_base_cam: &Transform,
        camera: Camera,
    ) -> Self {
        let (r_cam_base, p_cam_base) = t_base_cam.to_rot_trans_inv();
        OdometryError {
            landmark,
            observed,
            r_cam_base,
            p_cam_base,
            camera,
            block_sizes: [3, 3],
        }
    }
}

impl CostFunction for OdometryError {
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
        let t = Vector3::new(params[0][0], params[0][1], params[0][2]);
        let omega = Vector3::new(params[1][0], params[1][1], params[1][2]);

        let r_base_orig = so3::rodrigues(&omega).transpose();
        let x_cam = self.r_cam_base * (r_base_orig * (self.landmark - t)) + self.p_cam_base;
        let pixel = self.camera.project(&x_cam)?;
        let residuals =
            DVector::from_vec(vec![pixel.x - self.observed.x, pixel.y - self.observed.y]);

        let jacobian = compute_jacobian.then(|| {
            let j = self.camera.projection_jacobian(&x_cam);
            let r_cam_orig = self.r_cam_base * r_base_orig;
            let dpdt = -(j * r_cam_orig);
            let dpdw = j * so3::hat(&x_cam) * r_cam_orig * so3::rotation_update_inv(&omega);

            let mut jac = DMatrix::zeros(2, 6);
            jac.view_mut((0, 0), (2, 3)).copy_from(&dpdt);
            jac.view_mut((0, 3), (2, 3)).copy_from(&dpdw);
            jac
        });
        Some((residuals, jacobian))
    }
}
