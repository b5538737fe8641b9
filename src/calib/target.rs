//! Planar calibration target and per-view state.

use nalgebra::{Vector2, Vector3};

use crate::geometry::Transform;

/// Build the ordered `nx·ny` grid of target points on the Z = 0 plane.
///
/// Point `i` is `(square_size·(i mod nx), square_size·(i div nx), 0)`,
/// matching the row-major corner ordering of chessboard detectors.
pub fn grid_points(nx: usize, ny: usize, square_size: f64) -> Vec<Vector3<f64>> {
    (0..nx * ny)
        .map(|i| {
            Vector3::new(
                square_size * (i % nx) as f64,
                square_size * (i / nx) as f64,
                0.0,
            )
        })
        .collect()
}

/// One accepted calibration image: its identifier, the detected corner
/// pixels, and the grid-in-camera extrinsic owned by the view.
///
/// The extrinsic is the view's sole mutable state: per-view initialization
/// estimates it with intrinsics held fixed, and the joint refinement mutates
/// it alongside the shared intrinsics.
#[derive(Debug, Clone)]
pub struct CalibrationView {
    pub name: String,
    pub corners: Vec<Vector2<f64>>,
    pub extrinsic: Transform,
}
