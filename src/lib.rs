//! # omnivo
//!
//! A stereo visual-odometry and mapping core for omnidirectional cameras.
//!
//! Given calibrated stereo imagery the library
//! - calibrates intrinsic and extrinsic camera parameters from planar
//!   chessboard targets, and
//! - incrementally estimates the pose trajectory of a rigid platform together
//!   with a sparse 3D landmark map from successive stereo frames.
//!
//! ## Components
//!
//! - **Geometry**: SE(3) transforms with a minimal (translation, axis-angle)
//!   parameterization suited for direct use as solver parameter blocks
//! - **Camera models**: polymorphic projectors with analytic Jacobians; the
//!   omnidirectional Mei model is the reference instance
//! - **Cost functions**: grid reprojection, stereo reprojection and odometry
//!   residuals with hand-derived derivatives
//! - **Optimization**: a Levenberg-Marquardt solver over named parameter
//!   blocks with robust losses and a dense Schur complement for
//!   structure-from-motion problems
//! - **Calibration**: per-view extrinsic initialization, joint
//!   intrinsic+extrinsic refinement and residual analysis for planar targets
//! - **Mapping**: stereo rig, landmark map, windowed bundle adjustment and a
//!   RANSAC-based odometry estimator
//!
//! Image decoding, corner extraction, feature detection and descriptor
//! matching are external collaborators reached through the traits in
//! [`calib`] and [`mapping`].

pub mod calib;
pub mod camera;
pub mod core;
pub mod error;
pub mod factors;
pub mod geometry;
pub mod linalg;
pub mod logger;
pub mod mapping;
pub mod optimizer;

pub use camera::{mei::MeiProjector, Camera};
pub use error::{Error, Result};
pub use geometry::Transform;
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{LevenbergMarquardt, LinearSolverType, OptimizerConfig};
