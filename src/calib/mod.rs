//! Intrinsic camera calibration from planar chessboard targets.
//!
//! The pipeline mirrors the classic planar-target workflow:
//!
//! 1. corner extraction per image through an external [`GridExtractor`]
//!    (failures skip the view), optionally gated by an operator
//!    [`ExtractionReview`];
//! 2. per-view extrinsic initialization — an independent robustified solve
//!    per view starting from a grid one meter in front of the camera;
//! 3. joint refinement of the shared intrinsics and all view extrinsics;
//! 4. residual analysis with per-view outlier flagging and a 2D error
//!    histogram for diagnostic plotting.

use std::io::Write;

use nalgebra::{DVector, Vector2};
use tracing::{info, warn};

use crate::camera::Camera;
use crate::core::loss_functions::CauchyLoss;
use crate::core::problem::Problem;
use crate::error::{Error, Result};
use crate::factors::{GridEstimate, GridProjection};
use crate::geometry::Transform;
use crate::optimizer::{LevenbergMarquardt, OptimizerConfig};

pub mod config;
pub mod report;
pub mod stereo;
pub mod target;

pub use config::CalibrationConfig;
pub use report::{ResidualHistogram, ResidualReport};
pub use stereo::StereoRigCalibration;
pub use target::{grid_points, CalibrationView};

/// External chessboard-corner detector.
///
/// Implementations wrap whatever image pipeline the host uses; the engine
/// only consumes the ordered `nx·ny` corner pixels.
pub trait GridExtractor {
    /// Detect the `nx × ny` interior corners of the target in the image.
    ///
    /// Returns `None` when the pattern is not found.
    fn extract(&self, image_path: &str, nx: usize, ny: usize) -> Option<Vec<Vector2<f64>>>;
}

/// Operator gate for interactive extraction checking.
pub trait ExtractionReview {
    /// Present the detection; returning `false` drops the view.
    fn accept(&self, image_path: &str, corners: &[Vector2<f64>]) -> bool;
}

/// Starting extrinsic for every view: the grid one meter in front of the
/// camera with no rotation.
const INITIAL_EXTRINSIC: [f64; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];

/// Planar-target calibration engine for one camera.
pub struct CalibrationEngine {
    config: CalibrationConfig,
    grid: Vec<nalgebra::Vector3<f64>>,
    views: Vec<CalibrationView>,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        let grid = grid_points(config.nx, config.ny, config.square_size);
        CalibrationEngine {
            config,
            grid,
            views: Vec::new(),
        }
    }

    /// The target's 3D points on the Z = 0 plane.
    pub fn grid(&self) -> &[nalgebra::Vector3<f64>] {
        &self.grid
    }

    /// Accepted views so far.
    pub fn views(&self) -> &[CalibrationView] {
        &self.views
    }

    /// Run corner extraction over every configured image.
    ///
    /// Detector failures and operator rejections skip the view with a log
    /// entry. Fails with [`Error::NoValidViews`] when nothing survives.
    pub fn extract_views(
        &mut self,
        extractor: &dyn GridExtractor,
        review: Option<&dyn ExtractionReview>,
    ) -> Result<usize> {
        self.views.clear();
        let expected = self.config.nx * self.config.ny;
        for name in &self.config.image_names {
            let path = format!("{}{}", self.config.image_folder, name);
            let Some(corners) = extractor.extract(&path, self.config.nx, self.config.ny) else {
                warn!(image = %path, "pattern not found, view skipped");
                continue;
            };
            if corners.len() != expected {
                warn!(
                    image = %path,
                    got = corners.len(),
                    expected,
                    "detector returned wrong corner count, view skipped"
                );
                continue;
            }
            if self.config.check_extraction {
                if let Some(review) = review {
                    if !review.accept(&path, &corners) {
                        warn!(image = %path, "pattern not accepted by operator, view skipped");
                        continue;
                    }
                }
            }
            self.views.push(CalibrationView {
                name: path,
                corners,
                extrinsic: Transform::from_params(&INITIAL_EXTRINSIC),
            });
        }
        if self.views.is_empty() {
            return Err(Error::NoValidViews);
        }
        info!(views = self.views.len(), "grid extraction done");
        Ok(self.views.len())
    }

    /// Supply pre-extracted views directly (synthetic data, cached corners).
    pub fn set_views(&mut self, views: Vec<CalibrationView>) {
        self.views = views;
    }

    /// Estimate each view's extrinsic independently against the fixed
    /// intrinsics of `camera`, starting from [`INITIAL_EXTRINSIC`].
    ///
    /// Each view is a single-block robustified problem (Cauchy scale 1).
    pub fn initialize_extrinsics(&mut self, camera: &Camera) -> Result<()> {
        if self.views.is_empty() {
            return Err(Error::NoValidViews);
        }
        for view in &mut self.views {
            let mut problem = Problem::new();
            problem.add_residual_block(
                &["extrinsic"],
                Box::new(GridEstimate::new(
                    view.corners.clone(),
                    self.grid.clone(),
                    camera.clone(),
                )),
                Some(Box::new(CauchyLoss::new(1.0)?)),
            );

            let mut initial = std::collections::HashMap::new();
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

    /// Jointly refine the intrinsics and every view extrinsic.
    ///
    /// One problem with a `GridProjection` residual block per view over
    /// `{intrinsics, extrinsic_i}` and no robust loss. The refined parameters
    /// are written back into `camera` and the views.
    pub fn refine(&mut self, camera: &mut Camera) -> Result<()> {
        if self.views.is_empty() {
            return Err(Error::NoValidViews);
        }
        let mut problem = Problem::new();
        let mut initial = std::collections::HashMap::new();
        initial.insert(
            "intrinsics".to_string(),
            DVector::from_row_slice(camera.params()),
        );
        for (i, view) in self.views.iter().enumerate() {
            let key = format!("view_{i}");
            problem.add_residual_block(
                &["intrinsics", key.as_str()],
                Box::new(GridProjection::new(
                    view.corners.clone(),
                    self.grid.clone(),
                    camera.projector(),
                )),
                None,
            );
            initial.insert(key, DVector::from_row_slice(view.extrinsic.params()));
        }

        let config = OptimizerConfig::default().with_max_iterations(100);
        let mut solver = LevenbergMarquardt::with_config(config);
        let result = solver.solve(&problem, &initial)?;
        info!(%result, "joint refinement finished");

        camera.set_params(result.variables["intrinsics"].as_slice());
        for (i, view) in self.views.iter_mut().enumerate() {
            let key = format!("view_{i}");
            view.extrinsic = Transform::from_params(result.variables[&key].as_slice());
        }
        Ok(())
    }

    /// Full pipeline after extraction: per-view initialization followed by
    /// joint refinement.
    pub fn compute(&mut self, camera: &mut Camera) -> Result<()> {
        self.initialize_extrinsics(camera)?;
        self.refine(camera)
    }

    /// Reproject the grid through every view and aggregate the residuals.
    pub fn residual_analysis(&self, camera: &Camera) -> Result<ResidualReport> {
        report::analyze(
            camera,
            &self.grid,
            &self.views,
            self.config.outlier_thresh,
        )
    }

    /// Persist the intrinsic parameter vector: whitespace-separated doubles,
    /// newline-terminated.
    pub fn write_intrinsics<W: Write>(&self, camera: &Camera, writer: &mut W) -> Result<()> {
        let line: Vec<String> = camera.params().iter().map(|p| p.to_string()).collect();
        writeln!(writer, "{}", line.join(" "))?;
        Ok(())
    }

    /// Persist the per-view extrinsics, one 6-scalar line per view.
    pub fn write_extrinsics<W: Write>(&self, writer: &mut W) -> Result<()> {
        for view in &self.views {
            let line: Vec<String> = view.extrinsic.params().iter().map(|p| p.to_string()).collect();
            writeln!(writer, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    struct SyntheticExtractor {
        camera: Camera,
        extrinsics: Vec<Transform>,
        grid: Vec<Vector3<f64>>,
    }

    impl GridExtractor for SyntheticExtractor {
        fn extract(&self, image_path: &str, _nx: usize, _ny: usize) -> Option<Vec<Vector2<f64>>> {
            let index: usize = image_path
                .rsplit('_')
                .next()?
                .trim_end_matches(".pgm")
                .parse()
                .ok()?;
            let extrinsic = self.extrinsics.get(index)?;
            self.grid
                .iter()
                .map(|p| self.camera.project(&extrinsic.transform_point(p)))
                .collect()
        }
    }

    struct RejectAll;
    impl ExtractionReview for RejectAll {
        fn accept(&self, _image_path: &str, _corners: &[Vector2<f64>]) -> bool {
            false
        }
    }

    fn sample_config(n_images: usize, check_extraction: bool) -> CalibrationConfig {
        CalibrationConfig {
            nx: 6,
            ny: 4,
            square_size: 0.05,
            outlier_thresh: 1.0,
            check_extraction,
            image_folder: "img/".to_string(),
            image_names: (0..n_images).map(|i| format!("frame_{i}.pgm")).collect(),
        }
    }

    fn sample_extractor(n_views: usize) -> SyntheticExtractor {
        let camera = Camera::mei(&[0.5, 0.1, 450.0, 445.0, 640.0, 480.0]);
        let grid = grid_points(6, 4, 0.05);
        let extrinsics = (0..n_views)
            .map(|i| {
                Transform::new(
                    -0.1 + 0.02 * i as f64,
                    -0.05,
                    0.8 + 0.05 * i as f64,
                    0.05 * i as f64,
                    -0.03,
                    0.02,
                )
            })
            .collect();
        SyntheticExtractor {
            camera,
            extrinsics,
            grid,
        }
    }

    #[test]
    fn test_extract_views_accepts_synthetic_detections() {
        let mut engine = CalibrationEngine::new(sample_config(4, false));
        let n = engine.extract_views(&sample_extractor(4), None).unwrap();
        assert_eq!(n, 4);
        assert_eq!(engine.views()[0].name, "img/frame_0.pgm");
        assert_eq!(engine.views()[0].corners.len(), 24);
    }

    #[test]
    fn test_operator_rejection_yields_no_valid_views() {
        let mut engine = CalibrationEngine::new(sample_config(3, true));
        let err = engine
            .extract_views(&sample_extractor(3), Some(&RejectAll))
            .unwrap_err();
        assert!(matches!(err, Error::NoValidViews));
    }

    #[test]
    fn test_detector_failure_skips_view() {
        struct FailOn1 {
            inner: SyntheticExtractor,
        }
        impl GridExtractor for FailOn1 {
            fn extract(&self, image_path: &str, nx: usize, ny: usize) -> Option<Vec<Vector2<f64>>> {
                if image_path.contains("frame_1") {
                    return None;
                }
                self.inner.extract(image_path, nx, ny)
            }
        }
        let mut engine = CalibrationEngine::new(sample_config(3, false));
        let extractor = FailOn1 {
            inner: sample_extractor(3),
        };
        assert_eq!(engine.extract_views(&extractor, None).unwrap(), 2);
    }
}
