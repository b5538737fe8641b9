//! Sparse landmark map, stereo rig and odometry estimation.
//!
//! # Module Structure
//!
//! - [`rig`]: the fixed two-camera rig and its batched projection
//! - [`bundle`]: bundle adjustment over landmarks and a pose window
//! - [`odometry`]: the 3-point RANSAC pose estimator with span test
//! - [`map`]: the [`StereoMap`](map::StereoMap) container tying the pools,
//!   the trajectory and the association strategies together
//!
//! Feature detection and descriptor matching are external: the map consumes
//! [`Feature`] sets and delegates association to a [`Matcher`]
//! implementation supplied by the host.

use nalgebra::{Vector2, Vector3};

pub mod bundle;
pub mod map;
pub mod odometry;
pub mod rig;

pub use bundle::MapInitializer;
pub use map::{triangulate_midpoint, StereoMap};
pub use odometry::{Odometry, OdometryDebug};
pub use rig::StereoRig;

/// Opaque feature descriptor, produced and compared by the external matcher.
pub type Descriptor = Vec<f32>;

/// Which camera of the rig produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSide {
    Left,
    Right,
}

/// One image observation of a landmark.
#[derive(Debug, Clone)]
pub struct Observation {
    pub pose_idx: usize,
    pub camera: CameraSide,
    pub pixel: Vector2<f64>,
}

/// A detected image feature: pixel position plus descriptor.
#[derive(Debug, Clone)]
pub struct Feature {
    pub pt: Vector2<f64>,
    pub descriptor: Descriptor,
}

impl Feature {
    pub fn new(pt: Vector2<f64>, descriptor: Descriptor) -> Self {
        Feature { pt, descriptor }
    }
}

/// A mapped 3D point with its descriptor and observation history.
///
/// Observations are append-only and ordered by pose index; both cameras may
/// observe the landmark at the same pose.
#[derive(Debug, Clone)]
pub struct Landmark {
    pub position: Vector3<f64>,
    pub descriptor: Descriptor,
    observations: Vec<Observation>,
}

impl Landmark {
    pub fn new(position: Vector3<f64>, descriptor: Descriptor) -> Self {
        Landmark {
            position,
            descriptor,
            observations: Vec::new(),
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// Append an observation.
    ///
    /// # Panics
    ///
    /// Panics if `obs.pose_idx` precedes the last recorded observation.
    pub fn add_observation(&mut self, obs: Observation) {
        if let Some(last) = self.observations.last() {
            assert!(
                obs.pose_idx >= last.pose_idx,
                "observations must be ordered by pose index"
            );
        }
        self.observations.push(obs);
    }
}

/// External descriptor-matching contract.
///
/// All three odometry association strategies are expressed through this
/// trait; the host plugs in its feature pipeline.
pub trait Matcher {
    /// One-to-one brute-force matching: for each query, the index of its
    /// match in `features`, or `None`.
    fn brute_force_one_to_one(
        &self,
        queries: &[Feature],
        features: &[Feature],
    ) -> Vec<Option<usize>>;

    /// Matching gated around predicted pixel positions: only features within
    /// `radius` pixels of the query's position are considered.
    fn match_reprojected(
        &self,
        predicted: &[Feature],
        features: &[Feature],
        radius: f64,
    ) -> Vec<Option<usize>>;

    /// Pooled brute-force matching: every plausible candidate per query.
    fn brute_force_pool(&self, queries: &[Feature], features: &[Feature]) -> Vec<Vec<usize>>;
}
