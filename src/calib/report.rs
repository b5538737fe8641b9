//! Reprojection residual analysis.

use nalgebra::{Vector2, Vector3};
use tracing::{info, warn};

use super::target::CalibrationView;
use crate::camera::Camera;
use crate::error::Result;

/// Residual histogram resolution: one bin is 0.01 px.
const BIN_SIZE: f64 = 0.01;
/// Histogram side length; spans ±2 px around the center bin.
const HISTOGRAM_SIZE: usize = 400;

/// 2D histogram of reprojection deltas Δ = observed − projected.
///
/// Each delta is accumulated bilinearly into the four bins surrounding its
/// sub-bin position, which keeps the diagnostic plot smooth at the 0.01 px
/// resolution. Deltas outside the ±2 px span are dropped.
#[derive(Debug, Clone)]
pub struct ResidualHistogram {
    bins: Vec<f32>,
}

impl Default for ResidualHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ResidualHistogram {
    pub fn new() -> Self {
        ResidualHistogram {
            bins: vec![0.0; HISTOGRAM_SIZE * HISTOGRAM_SIZE],
        }
    }

    /// Side length in bins.
    pub fn size(&self) -> usize {
        HISTOGRAM_SIZE
    }

    /// Bin value at `(row, col)`.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.bins[row * HISTOGRAM_SIZE + col]
    }

    /// Accumulate one delta.
    pub fn accumulate(&mut self, delta: &Vector2<f64>) {
        let x = delta.x / BIN_SIZE + (HISTOGRAM_SIZE / 2) as f64;
        let y = delta.y / BIN_SIZE + (HISTOGRAM_SIZE / 2) as f64;
        for row in [y.floor(), y.ceil()] {
            for col in [x.floor(), x.ceil()] {
                if row >= 0.0
                    && col >= 0.0
                    && (row as usize) < HISTOGRAM_SIZE
                    && (col as usize) < HISTOGRAM_SIZE
                {
                    self.bins[row as usize * HISTOGRAM_SIZE + col as usize] += 1.0;
                }
            }
        }
    }

    /// Total accumulated mass.
    pub fn total(&self) -> f64 {
        self.bins.iter().map(|&v| v as f64).sum()
    }
}

/// Aggregated reprojection statistics over all views.
#[derive(Debug, Clone)]
pub struct ResidualReport {
    /// Root-mean-square error along x, in pixels.
    pub rms_x: f64,
    /// Root-mean-square error along y, in pixels.
    pub rms_y: f64,
    /// Largest residual magnitude, in pixels.
    pub max_error: f64,
    /// 2D delta histogram for diagnostic plotting.
    pub histogram: ResidualHistogram,
    /// Views containing at least one residual above the outlier threshold.
    pub flagged: Vec<String>,
}

/// Reproject the grid through every view and aggregate residuals.
///
/// A view is flagged when any of its residuals exceeds `outlier_thresh`
/// (0 disables flagging) or when a grid point fails to project at all.
pub fn analyze(
    camera: &Camera,
    grid: &[Vector3<f64>],
    views: &[CalibrationView],
    outlier_thresh: f64,
) -> Result<ResidualReport> {
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut max_sq = 0.0f64;
    let mut count = 0usize;
    let mut histogram = ResidualHistogram::new();
    let mut flagged = Vec::new();

    let thresh_sq = outlier_thresh * outlier_thresh;

    for view in views {
        let mut transformed = Vec::new();
        view.extrinsic.transform_points(grid, &mut transformed);
        let mut projected = Vec::new();
        let mask = camera.project_point_cloud(&transformed, &mut projected);

        let mut outlier_detected = false;
        for i in 0..grid.len() {
            if !mask[i] {
                warn!(view = %view.name, corner = i, "grid point failed to project");
                outlier_detected = true;
                continue;
            }
            let delta = view.corners[i] - projected[i];
            histogram.accumulate(&delta);
            let dx = delta.x * delta.x;
            let dy = delta.y * delta.y;
            if outlier_thresh != 0.0 && dx + dy > thresh_sq {
                warn!(
                    view = %view.name,
                    corner = i,
                    dx = delta.x,
                    dy = delta.y,
                    "reprojection outlier"
                );
                outlier_detected = true;
            }
            max_sq = max_sq.max(dx + dy);
            sum_x += dx;
            sum_y += dy;
            count += 1;
        }
        if outlier_detected {
            flagged.push(view.name.clone());
        }
    }

    let n = count.max(1) as f64;
    let report = ResidualReport {
        rms_x: (sum_x / n).sqrt(),
        rms_y: (sum_y / n).sqrt(),
        max_error: max_sq.sqrt(),
        histogram,
        flagged,
    };
    info!(
        rms_x = report.rms_x,
        rms_y = report.rms_y,
        max_error = report.max_error,
        flagged = report.flagged.len(),
        "residual analysis"
    );
    Ok(report)
}
