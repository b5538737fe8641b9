//! Planar-target reprojection cost functions for calibration.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector2, Vector3};

use super::CostFunction;
use crate::camera::{Camera, Projector};
use crate::geometry::so3;

fn extrinsic_parts(block: &DVector<f64>) -> (Vector3<f64>, Vector3<f64>) {
    (
        Vector3::new(block[0], block[1], block[2]),
        Vector3::new(block[3], block[4], block[5]),
    )
}

/// Per-view extrinsic estimation against fixed intrinsics.
///
/// One 6-scalar parameter block `(t, ω)` mapping grid points into the camera
/// frame as `X_c = R(ω)·X + t`; residuals are the stacked per-corner pixel
/// errors. Used with a robust loss to initialize each view before the joint
/// refinement.
pub struct GridEstimate {
    observations: Vec<Vector2<f64>>,
    grid: Vec<Vector3<f64>>,
    camera: Camera,
    block_sizes: [usize; 1],
}

impl GridEstimate {
    /// # Panics
    ///
    /// Panics if observation and grid point counts differ.
    pub fn new(observations: Vec<Vector2<f64>>, grid: Vec<Vector3<f64>>, camera: Camera) -> Self {
        assert_eq!(
            observations.len(),
            grid.len(),
            "observation and grid point counts must match"
        );
        GridEstimate {
            observations,
            grid,
            camera,
            block_sizes: [6],
        }
    }
}

impl CostFunction for GridEstimate {
    fn dim_residual(&self) -> usize {
        2 * self.observations.len()
    }

    fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let (t, omega) = extrinsic_parts(&params[0]);
        let rot = so3::rodrigues(&omega);
        let jl = so3::left_jacobian(&omega);

        let mut residuals = DVector::zeros(self.dim_residual());
        let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(self.dim_residual(), 6));

        for (i, (point, observed)) in self.grid.iter().zip(&self.observations).enumerate() {
            let rotated = rot * point;
            let x_cam = rotated + t;
            let pixel = self.camera.project(&x_cam)?;
            residuals[2 * i] = pixel.x - observed.x;
            residuals[2 * i + 1] = pixel.y - observed.y;

            if let Some(jac) = jacobian.as_mut() {
                let j = self.camera.projection_jacobian(&x_cam);
                // ∂r/∂t = J, ∂r/∂ω = −J·[R·X]ₓ·J_l(ω)
                let d_omega = -j * so3::hat(&rotated) * jl;
                jac.view_mut((2 * i, 0), (2, 3)).copy_from(&j);
                jac.view_mut((2 * i, 3), (2, 3)).copy_from(&d_omega);
            }
        }
        Some((residuals, jacobian))
    }
}

/// Joint intrinsic + extrinsic grid reprojection for one view.
///
/// Two parameter blocks: the shared intrinsics and this view's 6-scalar
/// extrinsic. The projector is evaluated at the candidate intrinsics on every
/// call.
pub struct GridProjection {
    observations: Vec<Vector2<f64>>,
    grid: Vec<Vector3<f64>>,
    projector: Arc<dyn Projector>,
    block_sizes: [usize; 2],
}

impl GridProjection {
    /// # Panics
    ///
    /// Panics if observation and grid point counts differ.
    pub fn new(
        observations: Vec<Vector2<f64>>,
        grid: Vec<Vector3<f64>>,
        projector: Arc<dyn Projector>,
    ) -> Self {
        assert_eq!(
            observations.len(),
            grid.len(),
            "observation and grid point counts must match"
        );
        let block_sizes = [projector.param_count(), 6];
        GridProjection {
            observations,
            grid,
            projector,
            block_sizes,
        }
    }
}

impl CostFunction for GridProjection {
    fn dim_residual(&self) -> usize {
        2 * self.observations.len()
    }

    fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let intrinsics = params[0].as_slice();
        let (t, omega) = extrinsic_parts(&params[1]);
        let rot = so3::rodrigues(&omega);
        let jl = so3::left_jacobian(&omega);
        let n_intr = self.block_sizes[0];

        let mut residuals = DVector::zeros(self.dim_residual());
        let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(self.dim_residual(), n_intr + 6));

        for (i, (point, observed)) in self.grid.iter().zip(&self.observations).enumerate() {
            let rotated = rot * point;
            let x_cam = rotated + t;
            let pixel = self.projector.project(intrinsics, &x_cam)?;
            residuals[2 * i] = pixel.x - observed.x;
            residuals[2 * i + 1] = pixel.y - observed.y;

            if let Some(jac) = jacobian.as_mut() {
                let d_intr = self.projector.intrinsics_jacobian(intrinsics, &x_cam);
                let j = self.projector.projection_jacobian(intrinsics, &x_cam);
                let d_omega = -j * so3::hat(&rotated) * jl;
                jac.view_mut((2 * i, 0), (2, n_intr)).copy_from(&d_intr);
                jac.view_mut((2 * i, n_intr), (2, 3)).copy_from(&j);
                jac.view_mut((2 * i, n_intr + 3), (2, 3)).copy_from(&d_omega);
            }
        }
        Some((residuals, jacobian))
    }
}

/// Grid reprojection through the second camera of a stereo rig.
///
/// Three parameter blocks: the second camera's intrinsics, the rig extrinsic
/// `T_c1_c2 = (t_r, ω_r)` mapping second-camera points into the first-camera
/// frame, and the view's grid-in-first-camera extrinsic `(t_e, ω_e)`. The
/// grid point is mapped as
///
/// ```text
/// X_c2 = R(ω_r)ᵀ·(R(ω_e)·X + t_e − t_r)
/// ```
pub struct StereoGridProjection {
    observations: Vec<Vector2<f64>>,
    grid: Vec<Vector3<f64>>,
    projector: Arc<dyn Projector>,
    block_sizes: [usize; 3],
}

impl StereoGridProjection {
    /// # Panics
    ///
    /// Panics if observation and grid point counts differ.
    pub fn new(
        observations: Vec<Vector2<f64>>,
        grid: Vec<Vector3<f64>>,
        projector: Arc<dyn Projector>,
    ) -> Self {
        assert_eq!(
            observations.len(),
            grid.len(),
            "observation and grid point counts must match"
        );
        let block_sizes = [projector.param_count(), 6, 6];
        StereoGridProjection {
            observations,
            grid,
            projector,
            block_sizes,
        }
    }
}

impl CostFunction for StereoGridProjection {
    fn dim_residual(&self) -> usize {
        2 * self.observations.len()
    }

    fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let intrinsics = params[0].as_slice();
        let (t_rig, omega_rig) = extrinsic_parts(&params[1]);
        let (t_ext, omega_ext) = extrinsic_parts(&params[2]);
        let rot_rig_t = so3::rodrigues(&omega_rig).transpose();
        let rot_ext = so3::rodrigues(&omega_ext);
        let jl_ext = so3::left_jacobian(&omega_ext);
        let jl_rig_neg = so3::left_jacobian(&(-omega_rig));
        let n_intr = self.block_sizes[0];

        let mut residuals = DVector::zeros(self.dim_residual());
        let mut jacobian =
            compute_jacobian.then(|| DMatrix::zeros(self.dim_residual(), n_intr + 12));

        for (i, (point, observed)) in self.grid.iter().zip(&self.observations).enumerate() {
            let rotated = rot_ext * point;
            let x_c1 = rotated + t_ext;
            let x_c2 = rot_rig_t * (x_c1 - t_rig);
            let pixel = self.projector.project(intrinsics, &x_c2)?;
            residuals[2 * i] = pixel.x - observed.x;
            residuals[2 * i + 1] = pixel.y - observed.y;

            if let Some(jac) = jacobian.as_mut() {
                let d_intr = self.projector.intrinsics_jacobian(intrinsics, &x_c2);
                let j = self.projector.projection_jacobian(intrinsics, &x_c2);
                // rig block: ∂X_c2/∂t_r = −Rᵀ, ∂X_c2/∂ω_r = [X_c2]ₓ·J_l(−ω_r)
                let d_t_rig = -j * rot_rig_t;
                let d_omega_rig = j * so3::hat(&x_c2) * jl_rig_neg;
                // view block: ∂X_c2/∂t_e = Rᵀ, ∂X_c2/∂ω_e = −Rᵀ·[R_e·X]ₓ·J_l(ω_e)
                let d_t_ext = j * rot_rig_t;
                let d_omega_ext = -j * rot_rig_t * so3::hat(&rotated) * jl_ext;

                jac.view_mut((2 * i, 0), (2, n_intr)).copy_from(&d_intr);
                jac.view_mut((2 * i, n_intr), (2, 3)).copy_from(&d_t_rig);
                jac.view_mut((2 * i, n_intr + 3), (2, 3))
                    .copy_from(&d_omega_rig);
                jac.view_mut((2 * i, n_intr + 6), (2, 3)).copy_from(&d_t_ext);
                jac.view_mut((2 * i, n_intr + 9), (2, 3))
                    .copy_from(&d_omega_ext);
            }
        }
        Some((residuals, jacobian))
    }
}
