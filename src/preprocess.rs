//! Mode-specific image conditioning applied before feature extraction.
//!
//! Camera frames pass through untouched. Sonar frames get a windowed
//! intensity remap to spread the usable return band over the full 8-bit
//! range, and detection can additionally be restricted by a static validity
//! mask computed once at startup.

use std::path::Path;

use anyhow::{bail, Context, Result};
use opencv::core::{self, Mat, Scalar, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::config::CaptureMode;

/// Lower bound of the usable sonar intensity window.
pub const SONAR_WINDOW_LOW: u8 = 100;
/// Upper bound of the usable sonar intensity window.
pub const SONAR_WINDOW_HIGH: u8 = 200;

/// Cutoff for binarizing the mask source image.
const MASK_THRESHOLD: f64 = 127.0;

/// Condition a raw frame for the given capture mode.
///
/// Camera mode is the identity. Sonar mode returns a new image with the
/// intensity window `[SONAR_WINDOW_LOW, SONAR_WINDOW_HIGH]` stretched to
/// `[0, 255]`.
pub fn prepare(image: &Mat, mode: CaptureMode) -> Result<Mat> {
    match mode {
        CaptureMode::Camera => Ok(image.clone()),
        CaptureMode::Sonar => remap_sonar(image),
    }
}

/// Windowed intensity remap for sonar returns.
///
/// Intensities below the window are lifted to the low bound. Intensities
/// above the window also collapse to the low bound (saturated returns are
/// treated as no-return, not as maximal signal), so both tails map to 0 in
/// the output.
fn remap_sonar(image: &Mat) -> Result<Mat> {
    let mut out = Mat::new_rows_cols_with_default(
        image.rows(),
        image.cols(),
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;

    let span = (SONAR_WINDOW_HIGH - SONAR_WINDOW_LOW) as f32;
    for i in 0..image.rows() {
        for j in 0..image.cols() {
            let mut pixel = *image.at_2d::<u8>(i, j)?;
            if pixel < SONAR_WINDOW_LOW {
                pixel = SONAR_WINDOW_LOW;
            }
            if pixel > SONAR_WINDOW_HIGH {
                pixel = SONAR_WINDOW_LOW;
            }
            let scaled = (pixel - SONAR_WINDOW_LOW) as f32 / span * 255.0;
            *out.at_2d_mut::<u8>(i, j)? = scaled as u8;
        }
    }

    Ok(out)
}

/// Static binary mask excluding known-invalid sonar regions from detection.
///
/// Loaded and binarized once per process; the binarized result is written
/// back next to the source so the active mask can be inspected.
pub struct SonarMask {
    mask: Mat,
}

impl SonarMask {
    /// Load the mask source, binarize it, and re-save the binarized image.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .with_context(|| format!("mask path {} is not valid UTF-8", path.display()))?;

        let source = imgcodecs::imread(path_str, imgcodecs::IMREAD_GRAYSCALE)
            .with_context(|| format!("failed to read sonar mask {}", path.display()))?;
        if source.empty() {
            bail!("sonar mask {} is missing or not a readable image", path.display());
        }

        let mut mask = Mat::default();
        imgproc::threshold(
            &source,
            &mut mask,
            MASK_THRESHOLD,
            255.0,
            imgproc::THRESH_BINARY,
        )?;

        imgcodecs::imwrite(path_str, &mask, &Vector::<i32>::new())
            .with_context(|| format!("failed to re-save binarized mask {}", path.display()))?;

        Ok(Self { mask })
    }

    pub fn as_mat(&self) -> &Mat {
        &self.mask
    }
}
