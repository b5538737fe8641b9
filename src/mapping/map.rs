//! The stereo landmark map: pools, trajectory and odometry strategies.

use nalgebra::{Vector2, Vector3};
use tracing::{debug, warn};

use super::bundle::{windowed_fixed_prefix, MapInitializer};
use super::odometry::{Odometry, OdometryDebug};
use super::rig::StereoRig;
use super::{CameraSide, Descriptor, Feature, Landmark, Matcher, Observation};
use crate::error::{Error, Result};
use crate::geometry::Transform;

/// Upper bound on landmarks fed into one odometry estimation.
const MAX_ACTIVE_LANDMARKS: usize = 300;
/// Minimum camera-frame depth for a landmark to be considered visible.
const MIN_CANDIDATE_DEPTH: f64 = 0.5;
/// Pixel gate radius for reprojection matching.
const REPROJECTION_MATCH_RADIUS: f64 = 20.0;
/// Working-map size above which the pooled strategy ignores the short-term
/// pool.
const POOL_STM_CUTOFF: usize = 50;
/// Working-map size required before a windowed bundle runs.
const MIN_BUNDLE_LANDMARKS: usize = 10;

/// Midpoint triangulation of two rays.
///
/// Returns the point halfway between the closest points of the two lines
/// `o1 + s·d1` and `o2 + t·d2`, or `None` when the rays are near-parallel.
pub fn triangulate_midpoint(
    origin1: &Vector3<f64>,
    dir1: &Vector3<f64>,
    origin2: &Vector3<f64>,
    dir2: &Vector3<f64>,
) -> Option<Vector3<f64>> {
    let d1d1 = dir1.dot(dir1);
    let d1d2 = dir1.dot(dir2);
    let d2d2 = dir2.dot(dir2);
    let denom = d1d1 * d2d2 - d1d2 * d1d2;
    if denom.abs() < 1e-12 * d1d1 * d2d2 {
        return None;
    }
    let w = origin1 - origin2;
    let s = (d1d2 * dir2.dot(&w) - d2d2 * dir1.dot(&w)) / denom;
    let t = (d1d1 * dir2.dot(&w) - d1d2 * dir1.dot(&w)) / denom;
    let p1 = origin1 + dir1 * s;
    let p2 = origin2 + dir2 * t;
    Some((p1 + p2) * 0.5)
}

/// Which landmark pool a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    Wm,
    Stm,
}

/// The map: a stereo rig, the pose trajectory and three landmark cohorts.
///
/// `stm` is the short-term pool of freshly triangulated landmarks, `wm` the
/// working map the optimizer refines, `lm` the long-term archive. Promotion
/// between pools is the host's policy; the estimators here only read the
/// cohorts.
pub struct StereoMap {
    pub rig: StereoRig,
    pub trajectory: Vec<Transform>,
    pub stm: Vec<Landmark>,
    pub wm: Vec<Landmark>,
    pub lm: Vec<Landmark>,
    ransac_seed: u64,
}

impl StereoMap {
    /// A map always starts with at least one pose in the trajectory.
    pub fn new(rig: StereoRig, initial_pose: Transform) -> Self {
        StereoMap {
            rig,
            trajectory: vec![initial_pose],
            stm: Vec::new(),
            wm: Vec::new(),
            lm: Vec::new(),
            ransac_seed: 0,
        }
    }

    /// Inject the RANSAC seed used by the odometry estimators.
    pub fn with_ransac_seed(mut self, seed: u64) -> Self {
        self.ransac_seed = seed;
        self
    }

    fn next_seed(&mut self) -> u64 {
        // one independent stream per odometry call, still reproducible
        self.ransac_seed = self.ransac_seed.wrapping_add(1);
        self.ransac_seed
    }

    /// Project world points through both cameras at trajectory pose
    /// `pose_idx`.
    pub fn project_point_cloud(
        &self,
        src: &[Vector3<f64>],
        dst1: &mut Vec<Vector2<f64>>,
        dst2: &mut Vec<Vector2<f64>>,
        pose_idx: usize,
    ) -> (Vec<bool>, Vec<bool>) {
        let mut body = Vec::new();
        self.trajectory[pose_idx].inverse_transform_points(src, &mut body);
        self.rig.project_point_cloud(&body, dst1, dst2)
    }

    /// Seed a landmark from one synchronized stereo observation pair.
    ///
    /// The pixel pair is lifted to rays, triangulated for an initial
    /// position, then refined in a micro-problem over the position alone
    /// with both observing poses fixed. The returned landmark carries both
    /// observations; the caller decides which pool receives it.
    pub fn initialize_landmark(
        &self,
        pixel1: Vector2<f64>,
        pixel2: Vector2<f64>,
        pose_idx: usize,
        descriptor: Descriptor,
    ) -> Result<Landmark> {
        let pose = &self.trajectory[pose_idx];
        let t_orig_cam1 = pose.compose(&self.rig.t_base_cam1);
        let t_orig_cam2 = pose.compose(&self.rig.t_base_cam2);

        let ray1 = self
            .rig
            .cam1
            .unproject(&pixel1)
            .ok_or(Error::ProjectionInvalid)?;
        let ray2 = self
            .rig
            .cam2
            .unproject(&pixel2)
            .ok_or(Error::ProjectionInvalid)?;

        let origin1 = t_orig_cam1.trans();
        let origin2 = t_orig_cam2.trans();
        let dir1 = t_orig_cam1.rot_matrix() * ray1;
        let dir2 = t_orig_cam2.rot_matrix() * ray2;
        let seed = triangulate_midpoint(&origin1, &dir1, &origin2, &dir2)
            .ok_or(Error::ProjectionInvalid)?;

        let mut init = MapInitializer::new();
        init.add_fixed_observation(0, &seed, pixel1, pose, &self.rig.cam1, &self.rig.t_base_cam1);
        init.add_fixed_observation(0, &seed, pixel2, pose, &self.rig.cam2, &self.rig.t_base_cam2);
        let solution = init.compute()?;
        let position = solution.landmark(0).ok_or(Error::ProjectionInvalid)?;

        let mut landmark = Landmark::new(position, descriptor);
        landmark.add_observation(Observation {
            pose_idx,
            camera: CameraSide::Left,
            pixel: pixel1,
        });
        landmark.add_observation(Observation {
            pose_idx,
            camera: CameraSide::Right,
            pixel: pixel2,
        });
        Ok(landmark)
    }

    /// Windowed bundle adjustment.
    ///
    /// Poses up to `max(1, k − 4)` (with `k` the newest pose index) stay
    /// anchored; the rest of the window and every working-map landmark are
    /// refined. Runs only once the working map exceeds
    /// [`MIN_BUNDLE_LANDMARKS`] landmarks.
    pub fn refine_map(&mut self) -> Result<()> {
        if self.wm.len() <= MIN_BUNDLE_LANDMARKS {
            debug!(wm = self.wm.len(), "working map too small, bundle skipped");
            return Ok(());
        }
        let fixed_prefix = windowed_fixed_prefix(self.trajectory.len());
        self.bundle(fixed_prefix)
    }

    /// Full bundle adjustment: only pose 0 stays anchored.
    pub fn refine_map_full(&mut self) -> Result<()> {
        self.bundle(0)
    }

    fn bundle(&mut self, fixed_prefix: usize) -> Result<()> {
        let mut init = MapInitializer::new();
        for (i, landmark) in self.wm.iter().enumerate() {
            for obs in landmark.observations() {
                let pose = &self.trajectory[obs.pose_idx];
                let camera = self.rig.camera(obs.camera);
                let extrinsic = self.rig.extrinsic(obs.camera);
                if obs.pose_idx <= fixed_prefix {
                    init.add_fixed_observation(
                        i,
                        &landmark.position,
                        obs.pixel,
                        pose,
                        camera,
                        extrinsic,
                    );
                } else {
                    init.add_observation(
                        i,
                        &landmark.position,
                        obs.pixel,
                        obs.pose_idx,
                        pose,
                        camera,
                        extrinsic,
                    );
                }
            }
        }
        if init.num_observations() == 0 {
            return Ok(());
        }

        let solution = init.compute()?;
        for (i, landmark) in self.wm.iter_mut().enumerate() {
            if let Some(position) = solution.landmark(i) {
                landmark.position = position;
            }
        }
        for idx in (fixed_prefix + 1)..self.trajectory.len() {
            if let Some(pose) = solution.pose(idx) {
                self.trajectory[idx] = pose;
            }
        }
        Ok(())
    }

    /// Gather odometry candidates from the working map, then the short-term
    /// pool, newest first.
    ///
    /// A landmark qualifies when its most recent observation is at the
    /// current pose and its depth in the camera frame at `reference` exceeds
    /// [`MIN_CANDIDATE_DEPTH`]. Returns `(pool, index, camera-frame point)`
    /// triples, at most [`MAX_ACTIVE_LANDMARKS`] of them.
    fn select_candidates(
        &self,
        reference: &Transform,
        include_stm: bool,
    ) -> Vec<(Pool, usize, Vector3<f64>)> {
        let current_pose = self.trajectory.len() - 1;
        let mut accepted = Vec::new();

        let scan = |pool: Pool, landmarks: &[Landmark], accepted: &mut Vec<(Pool, usize, Vector3<f64>)>| {
            for (k, landmark) in landmarks.iter().enumerate().rev() {
                if accepted.len() >= MAX_ACTIVE_LANDMARKS {
                    break;
                }
                let fresh = landmark
                    .last_observation()
                    .is_some_and(|obs| obs.pose_idx == current_pose);
                if !fresh {
                    continue;
                }
                let body = reference.inverse_transform_point(&landmark.position);
                let cam = self.rig.t_base_cam1.inverse_transform_point(&body);
                if cam.z > MIN_CANDIDATE_DEPTH {
                    accepted.push((pool, k, cam));
                }
            }
        };

        scan(Pool::Wm, &self.wm, &mut accepted);
        if include_stm {
            scan(Pool::Stm, &self.stm, &mut accepted);
        }
        accepted
    }

    fn landmark(&self, pool: Pool, index: usize) -> &Landmark {
        match pool {
            Pool::Wm => &self.wm[index],
            Pool::Stm => &self.stm[index],
        }
    }

    fn finish_odometry(&mut self, odometry: &mut Odometry) -> Result<Transform> {
        odometry.compute_transformation()?;
        let pose = odometry.pose;
        self.trajectory.push(pose);
        Ok(pose)
    }

    /// Odometry strategy 1: brute-force descriptor matching, one feature per
    /// landmark.
    ///
    /// On success the new pose is appended to the trajectory and returned;
    /// on failure the trajectory is untouched and the caller drops the
    /// frame.
    pub fn estimate_odometry(
        &mut self,
        features: &[Feature],
        matcher: &dyn Matcher,
    ) -> Result<Transform> {
        let entry_pose = *self.trajectory.last().expect("trajectory is never empty");
        let candidates = self.select_candidates(&entry_pose, true);
        let queries: Vec<Feature> = candidates
            .iter()
            .map(|&(pool, k, _)| {
                Feature::new(Vector2::zeros(), self.landmark(pool, k).descriptor.clone())
            })
            .collect();
        let matches = matcher.brute_force_one_to_one(&queries, features);

        let seed = self.next_seed();
        let mut odometry = Odometry::new(
            entry_pose,
            self.rig.t_base_cam1,
            self.rig.cam1.clone(),
            seed,
        );
        for (&(pool, k, _), m) in candidates.iter().zip(&matches) {
            if let Some(feature_idx) = m {
                odometry.cloud.push(self.landmark(pool, k).position);
                odometry.observations.push(features[*feature_idx].pt);
            }
        }
        debug!(cloud = odometry.cloud.len(), "brute-force odometry associations");

        odometry.ransac()?;
        self.finish_odometry(&mut odometry)
    }

    /// Odometry strategy 2: constant-velocity motion hypothesis plus gated
    /// reprojection matching within [`REPROJECTION_MATCH_RADIUS`] pixels.
    pub fn estimate_odometry_predicted(
        &mut self,
        features: &[Feature],
        matcher: &dyn Matcher,
    ) -> Result<Transform> {
        let entry_pose = *self.trajectory.last().expect("trajectory is never empty");
        let k = self.trajectory.len();
        let delta = if k > 1 {
            self.trajectory[k - 2].inverse_compose(&self.trajectory[k - 1])
        } else {
            Transform::identity()
        };
        let hypothesis = entry_pose.compose(&delta);

        let candidates = self.select_candidates(&hypothesis, true);
        let mut queries = Vec::new();
        let mut kept = Vec::new();
        for &(pool, idx, cam_point) in &candidates {
            match self.rig.cam1.project(&cam_point) {
                Some(predicted) => {
                    queries.push(Feature::new(
                        predicted,
                        self.landmark(pool, idx).descriptor.clone(),
                    ));
                    kept.push((pool, idx));
                }
                None => {
                    warn!("candidate fell outside the image under the motion hypothesis");
                }
            }
        }
        let matches = matcher.match_reprojected(&queries, features, REPROJECTION_MATCH_RADIUS);

        let seed = self.next_seed();
        let mut odometry = Odometry::new(
            entry_pose,
            self.rig.t_base_cam1,
            self.rig.cam1.clone(),
            seed,
        );
        for (&(pool, idx), m) in kept.iter().zip(&matches) {
            if let Some(feature_idx) = m {
                odometry.cloud.push(self.landmark(pool, idx).position);
                odometry.observations.push(features[*feature_idx].pt);
            }
        }
        debug!(cloud = odometry.cloud.len(), "predicted odometry associations");

        odometry.ransac()?;
        self.finish_odometry(&mut odometry)
    }

    /// Odometry strategy 3: brute-force candidate pools, one landmark may
    /// carry several feature candidates. The short-term pool is consulted
    /// only while the working map holds fewer than [`POOL_STM_CUTOFF`]
    /// landmarks.
    pub fn estimate_odometry_pool(
        &mut self,
        features: &[Feature],
        matcher: &dyn Matcher,
        debug_sink: Option<&mut OdometryDebug>,
    ) -> Result<Transform> {
        let entry_pose = *self.trajectory.last().expect("trajectory is never empty");
        let include_stm = self.wm.len() < POOL_STM_CUTOFF;
        let candidates = self.select_candidates(&entry_pose, include_stm);
        let queries: Vec<Feature> = candidates
            .iter()
            .map(|&(pool, k, _)| {
                Feature::new(Vector2::zeros(), self.landmark(pool, k).descriptor.clone())
            })
            .collect();
        let pools = matcher.brute_force_pool(&queries, features);

        let seed = self.next_seed();
        let mut odometry = Odometry::new(
            entry_pose,
            self.rig.t_base_cam1,
            self.rig.cam1.clone(),
            seed,
        );
        for (&(pool, k, _), feature_indices) in candidates.iter().zip(&pools) {
            let pixels: Vec<Vector2<f64>> =
                feature_indices.iter().map(|&j| features[j].pt).collect();
            if !pixels.is_empty() {
                odometry.cloud.push(self.landmark(pool, k).position);
                odometry.observation_pools.push(pixels);
            }
        }
        debug!(cloud = odometry.cloud.len(), "pooled odometry associations");

        odometry.ransac_pool(debug_sink)?;
        odometry.compute_transformation_pool()?;
        let pose = odometry.pose;
        self.trajectory.push(pose);
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn sample_rig() -> StereoRig {
        let params = [0.5, 0.05, 500.0, 500.0, 640.0, 480.0];
        StereoRig::new(
            Camera::mei(&params),
            Camera::mei(&params),
            Transform::identity(),
            Transform::new(0.24, 0.0, 0.0, 0.0, 0.0, 0.0),
        )
    }

    #[test]
    fn test_triangulate_midpoint_exact_intersection() {
        let p = Vector3::new(1.0, 2.0, 8.0);
        let o1 = Vector3::zeros();
        let o2 = Vector3::new(0.5, 0.0, 0.0);
        let d1 = (p - o1).normalize();
        let d2 = (p - o2).normalize();
        let x = triangulate_midpoint(&o1, &d1, &o2, &d2).unwrap();
        assert!((x - p).norm() < 1e-10);
    }

    #[test]
    fn test_triangulate_midpoint_rejects_parallel_rays() {
        let d = Vector3::new(0.0, 0.0, 1.0);
        assert!(triangulate_midpoint(
            &Vector3::zeros(),
            &d,
            &Vector3::new(0.5, 0.0, 0.0),
            &d
        )
        .is_none());
    }

    #[test]
    fn test_initialize_landmark_recovers_position() {
        let map = StereoMap::new(sample_rig(), Transform::identity());
        let truth = Vector3::new(0.6, -0.4, 6.0);
        let p1 = map
            .rig
            .cam1
            .project(&map.rig.t_base_cam1.inverse_transform_point(&truth))
            .unwrap();
        let p2 = map
            .rig
            .cam2
            .project(&map.rig.t_base_cam2.inverse_transform_point(&truth))
            .unwrap();
        let landmark = map
            .initialize_landmark(p1, p2, 0, vec![0.5; 8])
            .unwrap();
        assert!((landmark.position - truth).norm() < 1e-6);
        assert_eq!(landmark.observations().len(), 2);
        assert_eq!(landmark.observations()[0].camera, CameraSide::Left);
        assert_eq!(landmark.observations()[1].camera, CameraSide::Right);
    }

    #[test]
    fn test_project_point_cloud_uses_trajectory_pose() {
        let mut map = StereoMap::new(sample_rig(), Transform::identity());
        map.trajectory.push(Transform::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        let world = vec![Vector3::new(1.0, 0.0, 5.0)];
        let mut a1 = Vec::new();
        let mut a2 = Vec::new();
        map.project_point_cloud(&world, &mut a1, &mut a2, 1);
        // in pose 1's frame the point sits on the optical axis
        let mut b1 = Vec::new();
        let mut b2 = Vec::new();
        map.project_point_cloud(&world, &mut b1, &mut b2, 0);
        assert!(a1[0].x < b1[0].x);
    }

    #[test]
    fn test_small_working_map_skips_bundle() {
        let mut map = StereoMap::new(sample_rig(), Transform::identity());
        for _ in 0..MIN_BUNDLE_LANDMARKS {
            map.wm.push(Landmark::new(Vector3::new(0.0, 0.0, 5.0), Vec::new()));
        }
        // ten landmarks is not enough; nothing to solve, nothing changes
        map.refine_map().unwrap();
        assert_eq!(map.trajectory.len(), 1);
    }
}
