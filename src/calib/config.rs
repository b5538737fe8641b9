//! Calibration info file parsing.
//!
//! The info file is plain ASCII:
//!
//! ```text
//! Nx Ny sqSize outlierThresh checkExtraction
//! imageFolder
//! imageName1
//! imageName2
//! ...
//! ```
//!
//! The header carries five whitespace-separated tokens; the folder line is
//! prefixed verbatim to each subsequent image name; a blank line terminates
//! the list.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parsed contents of a calibration info file.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Interior corner count along the first grid axis.
    pub nx: usize,
    /// Interior corner count along the second grid axis.
    pub ny: usize,
    /// Chessboard square size in meters.
    pub square_size: f64,
    /// Outlier flagging threshold in pixels; 0 disables flagging.
    pub outlier_thresh: f64,
    /// Whether detections require interactive operator acceptance.
    pub check_extraction: bool,
    /// Prefix applied to every image name.
    pub image_folder: String,
    /// Image names, in file order.
    pub image_names: Vec<String>,
}

fn parse_header(line: &str) -> Result<(usize, usize, f64, f64, bool)> {
    let malformed = |what: &str| Error::ConfigMalformed(format!("header: {what}"));
    let mut tokens = line.split_whitespace();
    let mut next = |what: &'static str| tokens.next().ok_or_else(|| malformed(what));

    let nx: usize = next("Nx")?
        .parse()
        .map_err(|_| malformed("Nx is not a positive integer"))?;
    let ny: usize = next("Ny")?
        .parse()
        .map_err(|_| malformed("Ny is not a positive integer"))?;
    let square_size: f64 = next("sqSize")?
        .parse()
        .map_err(|_| malformed("sqSize is not a number"))?;
    let outlier_thresh: f64 = next("outlierThresh")?
        .parse()
        .map_err(|_| malformed("outlierThresh is not a number"))?;
    let check_extraction = match next("checkExtraction")? {
        "0" => false,
        "1" => true,
        other => {
            return Err(malformed(&format!(
                "checkExtraction must be 0 or 1, got '{other}'"
            )))
        }
    };

    if nx == 0 || ny == 0 {
        return Err(malformed("corner counts must be positive"));
    }
    if square_size <= 0.0 {
        return Err(malformed("sqSize must be positive"));
    }
    Ok((nx, ny, square_size, outlier_thresh, check_extraction))
}

impl CalibrationConfig {
    /// Load and parse an info file.
    pub fn from_info_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ConfigMissing(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_str_content(&content)
    }

    /// Parse info-file content.
    pub fn from_str_content(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::ConfigMalformed("empty file".to_string()))?;
        let (nx, ny, square_size, outlier_thresh, check_extraction) = parse_header(header)?;

        let image_folder = lines
            .next()
            .ok_or_else(|| Error::ConfigMalformed("missing image folder line".to_string()))?
            .to_string();

        let mut image_names = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            image_names.push(line.to_string());
        }

        Ok(CalibrationConfig {
            nx,
            ny,
            square_size,
            outlier_thresh,
            check_extraction,
            image_folder,
            image_names,
        })
    }
}
