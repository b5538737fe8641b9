//! Bundle adjustment over landmarks and a pose window.
//!
//! [`MapInitializer`] collects reprojection residuals into a single problem:
//! observations from fixed poses bind only the landmark (the pose is baked
//! into the cost by value), observations from free poses bind the landmark
//! together with the pose's translation and rotation blocks. The solve uses
//! the dense Schur complement and no robust loss.

use std::collections::HashMap;

use nalgebra::{DVector, Vector2, Vector3};
use tracing::debug;

use crate::camera::Camera;
use crate::core::problem::Problem;
use crate::error::Result;
use crate::factors::{ReprojectionErrorFixed, ReprojectionErrorStereo};
use crate::geometry::Transform;
use crate::optimizer::{LevenbergMarquardt, LinearSolverType, OptimizerConfig};

/// Index of the last fixed pose for a windowed bundle: with `k` the index of
/// the newest pose, everything up to `max(1, k − 4)` stays anchored.
pub fn windowed_fixed_prefix(trajectory_len: usize) -> usize {
    let k = trajectory_len.saturating_sub(1);
    k.saturating_sub(4).max(1)
}

/// Accumulates a landmark/pose refinement problem.
pub struct MapInitializer {
    problem: Problem,
    initial: HashMap<String, DVector<f64>>,
}

impl Default for MapInitializer {
    fn default() -> Self {
        Self::new()
    }
}

impl MapInitializer {
    pub fn new() -> Self {
        MapInitializer {
            problem: Problem::new(),
            initial: HashMap::new(),
        }
    }

    /// Parameter-block key of landmark `index`.
    pub fn landmark_key(index: usize) -> String {
        format!("pt_{index}")
    }

    /// Parameter-block keys of pose `index`.
    pub fn pose_keys(index: usize) -> (String, String) {
        (format!("trans_{index}"), format!("rot_{index}"))
    }

    fn register_landmark(&mut self, key: &str, position: &Vector3<f64>) {
        self.initial
            .entry(key.to_string())
            .or_insert_with(|| DVector::from_column_slice(position.as_slice()));
    }

    /// Add an observation from a fixed pose: only the landmark is free.
    pub fn add_fixed_observation(
        &mut self,
        landmark_index: usize,
        position: &Vector3<f64>,
        pixel: Vector2<f64>,
        pose: &Transform,
        camera: &Camera,
        t_base_cam: &Transform,
    ) {
        let key = Self::landmark_key(landmark_index);
        self.register_landmark(&key, position);
        self.problem.add_residual_block(
            &[key.as_str()],
            Box::new(ReprojectionErrorFixed::new(
                pixel,
                pose,
                t_base_cam,
                camera.clone(),
            )),
            None,
        );
    }

    /// Add an observation from a free pose: landmark and pose move together.
    pub fn add_observation(
        &mut self,
        landmark_index: usize,
        position: &Vector3<f64>,
        pixel: Vector2<f64>,
        pose_index: usize,
        pose: &Transform,
        camera: &Camera,
        t_base_cam: &Transform,
    ) {
        let key = Self::landmark_key(landmark_index);
        self.register_landmark(&key, position);
        let (trans_key, rot_key) = Self::pose_keys(pose_index);
        self.initial
            .entry(trans_key.clone())
            .or_insert_with(|| DVector::from_column_slice(pose.trans().as_slice()));
        self.initial
            .entry(rot_key.clone())
            .or_insert_with(|| DVector::from_column_slice(pose.rot().as_slice()));
        self.problem.add_residual_block(
            &[key.as_str(), trans_key.as_str(), rot_key.as_str()],
            Box::new(ReprojectionErrorStereo::new(
                pixel,
                t_base_cam,
                camera.clone(),
            )),
            None,
        );
    }

    /// Number of residual blocks added so far.
    pub fn num_observations(&self) -> usize {
        self.problem.num_residual_blocks()
    }

    /// Whether pose `index` participates as a free block.
    pub fn has_free_pose(&self, index: usize) -> bool {
        self.initial.contains_key(&Self::pose_keys(index).0)
    }

    /// Solve the accumulated problem.
    pub fn compute(self) -> Result<BundleSolution> {
        let config = OptimizerConfig::default().with_linear_solver(LinearSolverType::DenseSchur);
        let mut solver = LevenbergMarquardt::with_config(config);
        let result = solver.solve(&self.problem, &self.initial)?;
        debug!(%result, "bundle adjustment finished");
        Ok(BundleSolution {
            variables: result.variables,
        })
    }
}

/// Solved landmark positions and poses, addressed by the same indices used
/// when building the problem.
pub struct BundleSolution {
    variables: HashMap<String, DVector<f64>>,
}

impl BundleSolution {
    pub fn landmark(&self, index: usize) -> Option<Vector3<f64>> {
        self.variables
            .get(&MapInitializer::landmark_key(index))
            .map(|v| Vector3::new(v[0], v[1], v[2]))
    }

    pub fn pose(&self, index: usize) -> Option<Transform> {
        let (trans_key, rot_key) = MapInitializer::pose_keys(index);
        let trans = self.variables.get(&trans_key)?;
        let rot = self.variables.get(&rot_key)?;
        Some(Transform::from_parts(
            Vector3::new(trans[0], trans[1], trans[2]),
            Vector3::new(rot[0], rot[1], rot[2]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::StereoRig;

    #[test]
    fn test_windowed_fixed_prefix_rule() {
        // with K poses the anchor reaches max(1, K − 5)
        assert_eq!(windowed_fixed_prefix(1), 1);
        assert_eq!(windowed_fixed_prefix(2), 1);
        assert_eq!(windowed_fixed_prefix(6), 1);
        assert_eq!(windowed_fixed_prefix(7), 2);
        assert_eq!(windowed_fixed_prefix(10), 5);
        assert_eq!(windowed_fixed_prefix(20), 15);
    }

    fn sample_rig() -> StereoRig {
        let params = [0.5, 0.05, 500.0, 500.0, 640.0, 480.0];
        StereoRig::new(
            Camera::mei(&params),
            Camera::mei(&params),
            Transform::identity(),
            Transform::new(0.24, 0.0, 0.0, 0.0, 0.0, 0.0),
        )
    }

    fn observe(rig: &StereoRig, pose: &Transform, x: &Vector3<f64>) -> (Vector2<f64>, Vector2<f64>) {
        let body = pose.inverse_transform_point(x);
        let p1 = rig
            .cam1
            .project(&rig.t_base_cam1.inverse_transform_point(&body))
            .unwrap();
        let p2 = rig
            .cam2
            .project(&rig.t_base_cam2.inverse_transform_point(&body))
            .unwrap();
        (p1, p2)
    }

    #[test]
    fn test_micro_problem_refines_landmark_against_fixed_poses() {
        let rig = sample_rig();
        let pose = Transform::identity();
        let truth = Vector3::new(0.4, -0.2, 5.0);
        let (p1, p2) = observe(&rig, &pose, &truth);

        let seed = truth + Vector3::new(0.1, -0.05, 0.4);
        let mut init = MapInitializer::new();
        init.add_fixed_observation(0, &seed, p1, &pose, &rig.cam1, &rig.t_base_cam1);
        init.add_fixed_observation(0, &seed, p2, &pose, &rig.cam2, &rig.t_base_cam2);
        let solution = init.compute().unwrap();
        let refined = solution.landmark(0).unwrap();
        assert!((refined - truth).norm() < 1e-6, "refined: {refined:?}");
    }

    #[test]
    fn test_free_pose_moves_toward_truth() {
        let rig = sample_rig();
        let pose0 = Transform::identity();
        let pose1_truth = Transform::new(0.3, 0.0, 0.1, 0.0, 0.02, 0.0);
        let landmarks: Vec<Vector3<f64>> = (0..12)
            .map(|i| {
                Vector3::new(
                    -1.0 + 0.2 * i as f64,
                    0.5 - 0.1 * i as f64,
                    4.0 + 0.3 * i as f64,
                )
            })
            .collect();

        let mut init = MapInitializer::new();
        let perturbed = Transform::new(0.4, 0.05, 0.1, 0.0, 0.02, 0.01);
        for (i, x) in landmarks.iter().enumerate() {
            let (p1a, p2a) = observe(&rig, &pose0, x);
            init.add_fixed_observation(i, x, p1a, &pose0, &rig.cam1, &rig.t_base_cam1);
            init.add_fixed_observation(i, x, p2a, &pose0, &rig.cam2, &rig.t_base_cam2);
            let (p1b, p2b) = observe(&rig, &pose1_truth, x);
            init.add_observation(i, x, p1b, 1, &perturbed, &rig.cam1, &rig.t_base_cam1);
            init.add_observation(i, x, p2b, 1, &perturbed, &rig.cam2, &rig.t_base_cam2);
        }
        assert!(init.has_free_pose(1));
        assert!(!init.has_free_pose(0));

        let solution = init.compute().unwrap();
        let pose1 = solution.pose(1).unwrap();
        for i in 0..6 {
            assert!(
                (pose1.params()[i] - pose1_truth.params()[i]).abs() < 1e-6,
                "pose component {i}: {} vs {}",
                pose1.params()[i],
                pose1_truth.params()[i]
            );
        }
    }
}
