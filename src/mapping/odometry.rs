//! Pose estimation from landmark-to-feature associations.
//!
//! The estimator runs RANSAC over minimal 3-point pose hypotheses: each
//! iteration samples three landmarks, checks that their viewing rays span a
//! wide enough angular range (near-collinear triples give ill-conditioned
//! pose solves), fits a pose through a tiny nonlinear solve, and scores the
//! hypothesis by reprojecting the full cloud. A final refinement over every
//! inlier produces the pose estimate.
//!
//! Only the left camera participates; observations that originated from the
//! right camera are not represented here.

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::camera::Camera;
use crate::core::problem::Problem;
use crate::error::{Error, Result};
use crate::factors::OdometryError;
use crate::geometry::Transform;
use crate::optimizer::{LevenbergMarquardt, LinearSolverType, OptimizerConfig};

/// Pixel-error bound below which a reprojected landmark counts as an inlier.
const INLIER_THRESHOLD: f64 = 2.0;
/// Sample draws allowed per RANSAC iteration before giving up entirely.
const MAX_SAMPLE_REJECTIONS: usize = 10_000;
/// Iteration budget for the flat-observation kernel.
const RANSAC_ITERATIONS: usize = 300;
/// Iteration budget for the pooled-observation kernel.
const RANSAC_POOL_ITERATIONS: usize = 500;
/// Span-test threshold for the flat kernel, radians.
const SPAN_ANGLE: f64 = 0.2;
/// Span-test threshold for the pooled kernel, radians.
const SPAN_ANGLE_POOL: f64 = 0.15;
/// Inner solver iteration cap for minimal-sample fits.
const HYPOTHESIS_ITERATIONS: usize = 10;

/// Diagnostic partition of the best hypothesis, filled on request instead of
/// being collected in globals.
#[derive(Debug, Clone, Default)]
pub struct OdometryDebug {
    pub model_landmarks: Vec<Vector3<f64>>,
    pub inlier_landmarks: Vec<Vector3<f64>>,
    pub inlier_features: Vec<Vector2<f64>>,
    pub outlier_landmarks: Vec<Vector3<f64>>,
    pub outlier_features: Vec<Vector2<f64>>,
}

/// One odometry estimation over a fixed landmark/observation set.
///
/// The caller fills `cloud` with landmark positions and either
/// `observations` (one pixel per landmark) or `observation_pools` (several
/// candidate pixels per landmark), then runs the matching RANSAC kernel
/// followed by the final refinement. `pose` starts at the entry pose and
/// carries the current best estimate of `T_orig_base`.
pub struct Odometry {
    pub pose: Transform,
    t_base_cam: Transform,
    camera: Camera,
    pub cloud: Vec<Vector3<f64>>,
    pub observations: Vec<Vector2<f64>>,
    pub observation_pools: Vec<Vec<Vector2<f64>>>,
    pub inlier_mask: Vec<bool>,
    pub inlier_pool_mask: Vec<Vec<bool>>,
    rng: StdRng,
}

impl Odometry {
    /// `seed` makes the RANSAC sampling reproducible.
    pub fn new(entry_pose: Transform, t_base_cam: Transform, camera: Camera, seed: u64) -> Self {
        Odometry {
            pose: entry_pose,
            t_base_cam,
            camera,
            cloud: Vec::new(),
            observations: Vec::new(),
            observation_pools: Vec::new(),
            inlier_mask: Vec::new(),
            inlier_pool_mask: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of inliers in the best hypothesis so far.
    pub fn inlier_count(&self) -> usize {
        if self.observation_pools.is_empty() {
            self.inlier_mask.iter().filter(|&&m| m).count()
        } else {
            self.inlier_pool_mask
                .iter()
                .map(|mask| mask.iter().filter(|&&m| m).count())
                .sum()
        }
    }

    /// Non-degeneracy test on a minimal sample.
    ///
    /// Transforms the three landmarks into the camera frame at the current
    /// pose estimate and compares the pairwise inter-ray angles; the sample
    /// is accepted only when every pair of angles differs by at least
    /// `angle_th` radians.
    pub fn check_span(&self, points: &[Vector3<f64>; 3], angle_th: f64) -> bool {
        let t_orig_cam = self.pose.compose(&self.t_base_cam);
        let hp: Vec<Vector3<f64>> = points
            .iter()
            .map(|p| t_orig_cam.inverse_transform_point(p))
            .collect();
        let angle = |a: &Vector3<f64>, b: &Vector3<f64>| {
            (a.dot(b) / (a.norm() * b.norm())).clamp(-1.0, 1.0).acos()
        };
        let theta1 = angle(&hp[0], &hp[1]);
        let theta2 = angle(&hp[0], &hp[2]);
        let theta3 = angle(&hp[1], &hp[2]);
        (theta1 - theta2).abs() >= angle_th
            && (theta1 - theta3).abs() >= angle_th
            && (theta2 - theta3).abs() >= angle_th
    }

    fn sample_spanning_triple(&mut self, angle_th: f64) -> Result<[usize; 3]> {
        let n = self.cloud.len();
        let mut counter = 0;
        loop {
            let idx1 = self.rng.gen_range(0..n);
            let mut idx2 = self.rng.gen_range(0..n);
            while idx2 == idx1 {
                idx2 = self.rng.gen_range(0..n);
            }
            let mut idx3 = self.rng.gen_range(0..n);
            while idx3 == idx1 || idx3 == idx2 {
                idx3 = self.rng.gen_range(0..n);
            }
            counter += 1;
            if counter == MAX_SAMPLE_REJECTIONS {
                return Err(Error::DegenerateSample);
            }
            let triple = [self.cloud[idx1], self.cloud[idx2], self.cloud[idx3]];
            if self.check_span(&triple, angle_th) {
                return Ok([idx1, idx2, idx3]);
            }
        }
    }

    /// Solve a pose problem over the given (landmark, pixel) residuals.
    fn solve_pose(
        &self,
        residuals: &[(Vector3<f64>, Vector2<f64>)],
        start: &Transform,
        max_iterations: usize,
    ) -> Result<Transform> {
        let mut problem = Problem::new();
        for (landmark, pixel) in residuals {
            problem.add_residual_block(
                &["trans", "rot"],
                Box::new(OdometryError::new(
                    *landmark,
                    *pixel,
                    &self.t_base_cam,
                    self.camera.clone(),
                )),
                None,
            );
        }
        let mut initial = std::collections::HashMap::new();
        initial.insert(
            "trans".to_string(),
            nalgebra::DVector::from_column_slice(start.trans().as_slice()),
        );
        initial.insert(
            "rot".to_string(),
            nalgebra::DVector::from_column_slice(start.rot().as_slice()),
        );

        let config = OptimizerConfig::default()
            .with_max_iterations(max_iterations)
            .with_linear_solver(LinearSolverType::DenseSchur);
        let mut solver = LevenbergMarquardt::with_config(config);
        let result = solver.solve(&problem, &initial)?;
        Ok(Transform::from_parts(
            Vector3::new(
                result.variables["trans"][0],
                result.variables["trans"][1],
                result.variables["trans"][2],
            ),
            Vector3::new(
                result.variables["rot"][0],
                result.variables["rot"][1],
                result.variables["rot"][2],
            ),
        ))
    }

    /// Reproject the full cloud through a candidate pose.
    fn reproject_cloud(&self, pose: &Transform) -> (Vec<Vector2<f64>>, Vec<bool>) {
        let t_orig_cam = pose.compose(&self.t_base_cam);
        let mut cam_frame = Vec::new();
        t_orig_cam.inverse_transform_points(&self.cloud, &mut cam_frame);
        let mut projected = Vec::new();
        let mask = self.camera.project_point_cloud(&cam_frame, &mut projected);
        (projected, mask)
    }

    /// RANSAC over flat observations: one pixel per landmark.
    pub fn ransac(&mut self) -> Result<()> {
        assert_eq!(self.observations.len(), self.cloud.len());
        let n = self.cloud.len();
        if n < 3 {
            return Err(Error::InvalidInput(
                "RANSAC needs at least 3 associated landmarks".to_string(),
            ));
        }
        self.inlier_mask = vec![false; n];

        let initial_pose = self.pose;
        let mut best_inliers = 0;
        for _ in 0..RANSAC_ITERATIONS {
            let sample = self.sample_spanning_triple(SPAN_ANGLE)?;

            let residuals: Vec<_> = sample
                .iter()
                .map(|&i| (self.cloud[i], self.observations[i]))
                .collect();
            let Ok(pose) = self.solve_pose(&residuals, &initial_pose, HYPOTHESIS_ITERATIONS)
            else {
                continue;
            };

            let (projected, valid) = self.reproject_cloud(&pose);
            let mut current_mask = vec![false; n];
            let mut count = 0;
            for i in 0..n {
                if valid[i] && (self.observations[i] - projected[i]).norm() < INLIER_THRESHOLD {
                    current_mask[i] = true;
                    count += 1;
                }
            }

            if count > best_inliers {
                best_inliers = count;
                self.inlier_mask = current_mask;
                self.pose = pose;
            }
        }
        debug!(best_inliers, landmarks = n, "RANSAC finished");
        Ok(())
    }

    /// RANSAC over pooled observations: several candidate pixels per
    /// landmark, one drawn per sampled landmark, and inliers credited to the
    /// nearest candidate of each pool.
    pub fn ransac_pool(&mut self, mut debug_sink: Option<&mut OdometryDebug>) -> Result<()> {
        assert_eq!(self.observation_pools.len(), self.cloud.len());
        let n = self.cloud.len();
        if n < 3 {
            return Err(Error::InvalidInput(
                "RANSAC needs at least 3 associated landmarks".to_string(),
            ));
        }
        self.inlier_pool_mask = self
            .observation_pools
            .iter()
            .map(|pool| vec![false; pool.len()])
            .collect();

        let initial_pose = self.pose;
        let mut best_inliers = 0;
        for _ in 0..RANSAC_POOL_ITERATIONS {
            let sample = self.sample_spanning_triple(SPAN_ANGLE_POOL)?;
            let picks: [usize; 3] = [
                self.rng.gen_range(0..self.observation_pools[sample[0]].len()),
                self.rng.gen_range(0..self.observation_pools[sample[1]].len()),
                self.rng.gen_range(0..self.observation_pools[sample[2]].len()),
            ];

            let residuals: Vec<_> = sample
                .iter()
                .zip(&picks)
                .map(|(&i, &j)| (self.cloud[i], self.observation_pools[i][j]))
                .collect();
            let Ok(pose) = self.solve_pose(&residuals, &initial_pose, HYPOTHESIS_ITERATIONS)
            else {
                continue;
            };

            let (projected, valid) = self.reproject_cloud(&pose);
            let mut current_mask: Vec<Vec<bool>> = self
                .observation_pools
                .iter()
                .map(|pool| vec![false; pool.len()])
                .collect();
            let mut count = 0;
            for i in 0..n {
                if !valid[i] {
                    continue;
                }
                let mut best_err = f64::INFINITY;
                let mut best_j = None;
                for (j, candidate) in self.observation_pools[i].iter().enumerate() {
                    let err = (candidate - projected[i]).norm();
                    if err < best_err {
                        best_err = err;
                        best_j = Some(j);
                    }
                }
                if let Some(j) = best_j {
                    if best_err < INLIER_THRESHOLD {
                        current_mask[i][j] = true;
                        count += 1;
                    }
                }
            }

            if count > best_inliers {
                best_inliers = count;
                self.inlier_pool_mask = current_mask;
                self.pose = pose;

                if let Some(sink) = debug_sink.as_deref_mut() {
                    self.fill_debug(sink, &sample, &picks);
                }
            }
        }
        debug!(best_inliers, landmarks = n, "pooled RANSAC finished");
        Ok(())
    }

    fn fill_debug(&self, sink: &mut OdometryDebug, sample: &[usize; 3], picks: &[usize; 3]) {
        sink.model_landmarks.clear();
        sink.inlier_landmarks.clear();
        sink.inlier_features.clear();
        sink.outlier_landmarks.clear();
        sink.outlier_features.clear();
        for (i, pool) in self.observation_pools.iter().enumerate() {
            let mut is_inlier = false;
            for (j, candidate) in pool.iter().enumerate() {
                if self.inlier_pool_mask[i][j] {
                    is_inlier = true;
                    let is_model = sample
                        .iter()
                        .zip(picks)
                        .any(|(&si, &sj)| si == i && sj == j);
                    if is_model {
                        sink.model_landmarks.push(self.cloud[i]);
                    } else {
                        sink.inlier_landmarks.push(self.cloud[i]);
                        sink.inlier_features.push(*candidate);
                    }
                } else {
                    sink.outlier_features.push(*candidate);
                }
            }
            if !is_inlier {
                sink.outlier_landmarks.push(self.cloud[i]);
            }
        }
    }

    /// Final refinement over every flagged inlier.
    pub fn compute_transformation(&mut self) -> Result<()> {
        assert_eq!(self.observations.len(), self.cloud.len());
        assert_eq!(self.inlier_mask.len(), self.cloud.len());
        let residuals: Vec<_> = (0..self.cloud.len())
            .filter(|&i| self.inlier_mask[i])
            .map(|i| (self.cloud[i], self.observations[i]))
            .collect();
        if residuals.len() < 3 {
            return Err(Error::SolverFailed(
                "too few inliers for pose refinement".to_string(),
            ));
        }
        let start = self.pose;
        self.pose = self.solve_pose(&residuals, &start, 50)?;
        Ok(())
    }

    /// Final refinement over every flagged pooled inlier.
    pub fn compute_transformation_pool(&mut self) -> Result<()> {
        assert_eq!(self.observation_pools.len(), self.cloud.len());
        assert_eq!(self.inlier_pool_mask.len(), self.cloud.len());
        let mut residuals = Vec::new();
        for (i, pool) in self.observation_pools.iter().enumerate() {
            for (j, candidate) in pool.iter().enumerate() {
                if self.inlier_pool_mask[i][j] {
                    residuals.push((self.cloud[i], *candidate));
                }
            }
        }
        if residuals.len() < 3 {
            return Err(Error::SolverFailed(
                "too few inliers for pose refinement".to_string(),
            ));
        }
        let start = self.pose;
        self.pose = self.solve_pose(&residuals, &start, 50)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAM_PARAMS: [f64; 6] = [0.0, 0.0, 500.0, 500.0, 500.0, 500.0];

    fn pinhole_odometry() -> Odometry {
        Odometry::new(
            Transform::identity(),
            Transform::identity(),
            Camera::mei(&CAM_PARAMS),
            7,
        )
    }

    #[test]
    fn test_span_rejects_common_ray() {
        // three points along one ray from the origin subtend zero pairwise
        // angle differences
        let odometry = pinhole_odometry();
        let ray = Vector3::new(0.2, 0.1, 1.0);
        let points = [ray, ray * 2.0, ray * 5.0];
        assert!(!odometry.check_span(&points, 0.1));
    }

    #[test]
    fn test_span_accepts_rotated_third_point() {
        let odometry = pinhole_odometry();
        let ray = Vector3::new(0.2, 0.1, 1.0);
        // rotate the third point 0.3 rad about the y axis
        let rot = crate::geometry::so3::rodrigues(&Vector3::new(0.0, 0.3, 0.0));
        let points = [ray, ray * 2.0, rot * (ray * 5.0)];
        assert!(odometry.check_span(&points, 0.1));
    }

    #[test]
    fn test_degenerate_cloud_aborts() {
        let mut odometry = pinhole_odometry();
        // every landmark on one ray: no sample can pass the span test
        let ray = Vector3::new(0.1, 0.0, 1.0);
        for i in 1..=8 {
            odometry.cloud.push(ray * i as f64);
            odometry.observations.push(Vector2::new(550.0, 500.0));
        }
        assert!(matches!(odometry.ransac(), Err(Error::DegenerateSample)));
    }

    #[test]
    fn test_too_few_landmarks_is_invalid_input() {
        let mut odometry = pinhole_odometry();
        odometry.cloud.push(Vector3::new(0.0, 0.0, 2.0));
        odometry.observations.push(Vector2::new(500.0, 500.0));
        assert!(matches!(odometry.ransac(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_recovers_small_motion_without_outliers() {
        let camera = Camera::mei(&CAM_PARAMS);
        let truth = Transform::new(0.05, -0.02, 0.01, 0.0, 0.0, 0.02);
        let mut odometry = Odometry::new(
            Transform::identity(),
            Transform::identity(),
            camera.clone(),
            42,
        );
        for i in 0..30 {
            let x = Vector3::new(
                -2.0 + 0.15 * i as f64,
                1.5 - 0.1 * i as f64,
                4.0 + 0.2 * (i % 7) as f64,
            );
            let pixel = camera
                .project(&truth.inverse_transform_point(&x))
                .unwrap();
            odometry.cloud.push(x);
            odometry.observations.push(pixel);
        }
        odometry.ransac().unwrap();
        assert_eq!(odometry.inlier_count(), 30);
        odometry.compute_transformation().unwrap();
        for i in 0..6 {
            assert!(
                (odometry.pose.params()[i] - truth.params()[i]).abs() < 1e-6,
                "component {i}: {} vs {}",
                odometry.pose.params()[i],
                truth.params()[i]
            );
        }
    }
}
