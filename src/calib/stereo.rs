//! Stereo rig extrinsic calibration.
//!
//! Given two mono-calibrated cameras observing the same planar target in
//! synchronized image pairs, estimate the rig extrinsic `T_c1_c2` (second
//! camera in the first camera's frame) jointly with both intrinsic vectors
//! and the per-pair grid extrinsics. Each pair contributes one left
//! `GridProjection` block over `{intrinsics1, extrinsic_i}` and one right
//! `StereoGridProjection` block over `{intrinsics2, rig, extrinsic_i}`.

use std::collections::HashMap;

use nalgebra::{DVector, Vector2, Vector3};
use tracing::info;

use super::target::grid_points;
use crate::camera::Camera;
use crate::core::loss_functions::CauchyLoss;
use crate::core::problem::Problem;
use crate::error::{Error, Result};
use crate::factors::{GridEstimate, GridProjection, StereoGridProjection};
use crate::geometry::Transform;
use crate::optimizer::{LevenbergMarquardt, OptimizerConfig};

/// One synchronized pair of target detections.
#[derive(Debug, Clone)]
pub struct StereoPairView {
    pub name: String,
    pub left_corners: Vec<Vector2<f64>>,
    pub right_corners: Vec<Vector2<f64>>,
    /// Grid-in-first-camera extrinsic, owned by the pair.
    pub extrinsic: Transform,
}

/// Joint estimation of the rig extrinsic from paired grid views.
pub struct StereoRigCalibration {
    grid: Vec<Vector3<f64>>,
    views: Vec<StereoPairView>,
    rig: Transform,
}

impl StereoRigCalibration {
    /// `initial_rig` is the starting guess for `T_c1_c2`; a translation-only
    /// baseline estimate is usually sufficient.
    pub fn new(
        nx: usize,
        ny: usize,
        square_size: f64,
        views: Vec<StereoPairView>,
        initial_rig: Transform,
    ) -> Self {
        StereoRigCalibration {
            grid: grid_points(nx, ny, square_size),
            views,
            rig: initial_rig,
        }
    }

    /// Current rig extrinsic estimate.
    pub fn rig(&self) -> &Transform {
        &self.rig
    }

    pub fn views(&self) -> &[StereoPairView] {
        &self.views
    }

    /// Initialize every pair's grid extrinsic from the left detections only,
    /// with the first camera's intrinsics held fixed.
    pub fn initialize_extrinsics(&mut self, left: &Camera) -> Result<()> {
        if self.views.is_empty() {
            return Err(Error::NoValidViews);
        }
        for view in &mut self.views {
            let mut problem = Problem::new();
            problem.add_residual_block(
                &["extrinsic"],
                Box::new(GridEstimate::new(
                    view.left_corners.clone(),
                    self.grid.clone(),
                    left.clone(),
                )),
                Some(Box::new(CauchyLoss::new(1.0)?)),
            );
            let mut initial = HashMap::new();
            initial.insert(
                "extrinsic".to_string(),
                DVector::from_row_slice(view.extrinsic.params()),
            );
            let mut solver = LevenbergMarquardt::new();
            let result = solver.solve(&problem, &initial)?;
            view.extrinsic = Transform::from_params(result.variables["extrinsic"].as_slice());
        }
        Ok(())
    }

    /// Jointly refine both intrinsic vectors, the rig extrinsic and every
    /// pair extrinsic. The refined values are written back.
    pub fn refine(&mut self, left: &mut Camera, right: &mut Camera) -> Result<()> {
        if self.views.is_empty() {
            return Err(Error::NoValidViews);
        }
        let mut problem = Problem::new();
        let mut initial = HashMap::new();
        initial.insert(
            "intrinsics1".to_string(),
            DVector::from_row_slice(left.params()),
        );
        initial.insert(
            "intrinsics2".to_string(),
            DVector::from_row_slice(right.params()),
        );
        initial.insert("rig".to_string(), DVector::from_row_slice(self.rig.params()));

        for (i, view) in self.views.iter().enumerate() {
            let key = format!("view_{i}");
            problem.add_residual_block(
                &["intrinsics1", key.as_str()],
                Box::new(GridProjection::new(
                    view.left_corners.clone(),
                    self.grid.clone(),
                    left.projector(),
                )),
                None,
            );
            problem.add_residual_block(
                &["intrinsics2", "rig", key.as_str()],
                Box::new(StereoGridProjection::new(
                    view.right_corners.clone(),
                    self.grid.clone(),
                    right.projector(),
                )),
                None,
            );
            initial.insert(key, DVector::from_row_slice(view.extrinsic.params()));
        }

        let config = OptimizerConfig::default().with_max_iterations(100);
        let mut solver = LevenbergMarquardt::with_config(config);
        let result = solver.solve(&problem, &initial)?;
        info!(%result, "stereo rig refinement finished");

        left.set_params(result.variables["intrinsics1"].as_slice());
        right.set_params(result.variables["intrinsics2"].as_slice());
        self.rig = Transform::from_params(result.variables["rig"].as_slice());
        for (i, view) in self.views.iter_mut().enumerate() {
            let key = format!("view_{i}");
            view.extrinsic = Transform::from_params(result.variables[&key].as_slice());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT_PARAMS: [f64; 6] = [0.6, 0.1, 470.0, 468.0, 640.0, 480.0];
    const RIGHT_PARAMS: [f64; 6] = [0.58, 0.11, 472.0, 471.0, 655.0, 488.0];

    fn synthesize_pairs(rig: &Transform, extrinsics: &[Transform]) -> Vec<StereoPairView> {
        let left = Camera::mei(&LEFT_PARAMS);
        let right = Camera::mei(&RIGHT_PARAMS);
        let grid = grid_points(6, 4, 0.05);
        extrinsics
            .iter()
            .enumerate()
            .map(|(i, extrinsic)| {
                let left_corners = grid
                    .iter()
                    .map(|p| left.project(&extrinsic.transform_point(p)).unwrap())
                    .collect();
                let right_corners = grid
                    .iter()
                    .map(|p| {
                        let x_c1 = extrinsic.transform_point(p);
                        right.project(&rig.inverse_transform_point(&x_c1)).unwrap()
                    })
                    .collect();
                StereoPairView {
                    name: format!("pair_{i}"),
                    left_corners,
                    right_corners,
                    extrinsic: Transform::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0),
                }
            })
            .collect()
    }

    #[test]
    fn test_recovers_rig_extrinsic() {
        let rig_truth = Transform::new(0.25, 0.01, -0.005, 0.0, 0.04, -0.01);
        let extrinsics: Vec<Transform> = (0..6)
            .map(|i| {
                Transform::new(
                    -0.12 + 0.03 * i as f64,
                    -0.06 + 0.01 * i as f64,
                    0.9 + 0.06 * i as f64,
                    0.08 * i as f64 - 0.2,
                    0.05 - 0.02 * i as f64,
                    0.03,
                )
            })
            .collect();
        let views = synthesize_pairs(&rig_truth, &extrinsics);

        let mut left = Camera::mei(&LEFT_PARAMS);
        let mut right = Camera::mei(&RIGHT_PARAMS);
        let mut calib = StereoRigCalibration::new(
            6,
            4,
            0.05,
            views,
            Transform::new(0.2, 0.0, 0.0, 0.0, 0.0, 0.0),
        );
        calib.initialize_extrinsics(&left).unwrap();
        calib.refine(&mut left, &mut right).unwrap();

        for i in 0..6 {
            assert!(
                (calib.rig().params()[i] - rig_truth.params()[i]).abs() < 1e-6,
                "rig component {i}: {} vs {}",
                calib.rig().params()[i],
                rig_truth.params()[i]
            );
        }
    }
}
