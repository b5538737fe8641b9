//! The fixed stereo rig: two cameras and their body-frame extrinsics.

use nalgebra::{Vector2, Vector3};

use super::CameraSide;
use crate::camera::Camera;
use crate::geometry::Transform;

/// Two cameras rigidly mounted on a body frame.
///
/// `t_base_cam1` and `t_base_cam2` map camera-frame points into the body
/// frame; their inverses take body-frame points into each camera for
/// projection.
#[derive(Debug, Clone)]
pub struct StereoRig {
    pub cam1: Camera,
    pub cam2: Camera,
    pub t_base_cam1: Transform,
    pub t_base_cam2: Transform,
}

impl StereoRig {
    pub fn new(cam1: Camera, cam2: Camera, t_base_cam1: Transform, t_base_cam2: Transform) -> Self {
        StereoRig {
            cam1,
            cam2,
            t_base_cam1,
            t_base_cam2,
        }
    }

    pub fn camera(&self, side: CameraSide) -> &Camera {
        match side {
            CameraSide::Left => &self.cam1,
            CameraSide::Right => &self.cam2,
        }
    }

    pub fn extrinsic(&self, side: CameraSide) -> &Transform {
        match side {
            CameraSide::Left => &self.t_base_cam1,
            CameraSide::Right => &self.t_base_cam2,
        }
    }

    /// Project body-frame points through both cameras.
    ///
    /// `dst1`/`dst2` are resized to `|src|` with invalid entries keeping
    /// their slot; the returned masks mark valid projections.
    pub fn project_point_cloud(
        &self,
        src: &[Vector3<f64>],
        dst1: &mut Vec<Vector2<f64>>,
        dst2: &mut Vec<Vector2<f64>>,
    ) -> (Vec<bool>, Vec<bool>) {
        let mut cam_frame = Vec::new();
        self.t_base_cam1.inverse_transform_points(src, &mut cam_frame);
        let mask1 = self.cam1.project_point_cloud(&cam_frame, dst1);
        self.t_base_cam2.inverse_transform_points(src, &mut cam_frame);
        let mask2 = self.cam2.project_point_cloud(&cam_frame, dst2);
        (mask1, mask2)
    }
}
