//! Cost functions for the nonlinear least-squares problems.
//!
//! Every cost function exposes its residual count, its parameter-block sizes
//! and a `linearize` entry point producing the residual vector and, on
//! request, the stacked Jacobian — one column block per parameter block, in
//! declaration order. The solver consumes these as opaque callables.
//!
//! All residuals are pixel errors, two scalars per observation, computed as
//! `predicted − observed`.
//!
//! # Module Structure
//!
//! - [`grid`]: planar-target reprojection for calibration
//! - [`reprojection`]: stereo landmark reprojection for bundle adjustment
//! - [`odometry`]: pose-only reprojection for the RANSAC estimator

use nalgebra::{DMatrix, DVector};

pub mod grid;
pub mod odometry;
pub mod reprojection;

pub use grid::{GridEstimate, GridProjection, StereoGridProjection};
pub use odometry::OdometryError;
pub use reprojection::{ReprojectionErrorFixed, ReprojectionErrorStereo};

/// A residual block's cost function.
///
/// `linearize` returns `None` when a camera projection is invalid at the
/// supplied parameters; the solver treats this as a rejected step, or as a
/// fatal [`crate::Error::ProjectionInvalid`] when it happens at the initial
/// point.
pub trait CostFunction: Send + Sync {
    /// Number of residual scalars.
    fn dim_residual(&self) -> usize;

    /// Sizes of the parameter blocks, in the order `linearize` receives them.
    fn block_sizes(&self) -> &[usize];

    /// Evaluate the residual and, when `compute_jacobian` is set, the stacked
    /// Jacobian of shape `dim_residual × Σ block_sizes`.
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)>;
}
