//! Interest-point detection and descriptor computation.
//!
//! Wraps a SIFT extractor configured per capture mode. The extractor is a
//! pure function of its input and configuration: no frame-to-frame state,
//! and an image with no detectable features yields an empty [`FeatureSet`]
//! rather than an error.

use anyhow::Result;
use opencv::core::{KeyPoint, Mat, Ptr, Vector};
use opencv::features2d;
use opencv::prelude::*;

use crate::config::CaptureMode;

/// Fixed length of a SIFT descriptor row.
pub const DESCRIPTOR_LENGTH: i32 = 128;

/// Keypoints and their descriptors for one frame.
///
/// Row `i` of `descriptors` belongs to `keypoints[i]`; the row count always
/// equals the keypoint count.
pub struct FeatureSet {
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
}

impl FeatureSet {
    /// Number of detected keypoints.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Flatten the descriptor matrix in row-major order.
    pub fn flatten(&self) -> Result<Vec<f32>> {
        let rows = self.descriptors.rows();
        let cols = self.descriptors.cols();
        let mut data = Vec::with_capacity((rows * cols).max(0) as usize);
        for i in 0..rows {
            for j in 0..cols {
                data.push(*self.descriptors.at_2d::<f32>(i, j)?);
            }
        }
        Ok(data)
    }
}

/// SIFT-backed feature extractor with mode-dependent layering.
pub struct FeatureExtractor {
    sift: Ptr<features2d::SIFT>,
}

impl FeatureExtractor {
    /// Build an extractor for the given mode and sensitivity.
    ///
    /// `contrast_threshold` filters weak responses; higher values keep fewer
    /// keypoints. Sonar mode reduces the octave layering via
    /// [`CaptureMode::octave_layers`].
    pub fn new(mode: CaptureMode, contrast_threshold: f64) -> Result<Self> {
        let sift = features2d::SIFT::create(
            0,
            mode.octave_layers(),
            contrast_threshold,
            10.0,
            1.6,
            false,
        )?;
        Ok(Self { sift })
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// `mask` restricts detection to non-zero regions when present.
    pub fn extract(&mut self, image: &Mat, mask: Option<&Mat>) -> Result<FeatureSet> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        let mask = match mask {
            Some(m) => m.clone(),
            None => Mat::default(),
        };
        self.sift
            .detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
        Ok(FeatureSet {
            keypoints,
            descriptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Scalar;

    /// Pseudo-noise texture with structure at many scales.
    fn textured_image(size: i32) -> Mat {
        let rows: Vec<Vec<u8>> = (0..size)
            .map(|y| {
                (0..size)
                    .map(|x| (((x * 7 + y * 13) % 251) as u16 * (1 + (x + y) % 3) as u16 % 256) as u8)
                    .collect()
            })
            .collect();
        Mat::from_slice_2d(&rows).unwrap()
    }

    #[test]
    fn test_keypoint_and_descriptor_counts_agree() {
        let image = textured_image(128);
        let mut extractor = FeatureExtractor::new(CaptureMode::Camera, 0.02).unwrap();
        let features = extractor.extract(&image, None).unwrap();

        assert!(!features.is_empty(), "textured image should yield keypoints");
        assert_eq!(features.descriptors.rows() as usize, features.len());
        assert_eq!(features.descriptors.cols(), DESCRIPTOR_LENGTH);
    }

    #[test]
    fn test_blank_image_yields_empty_set() {
        let image =
            Mat::new_rows_cols_with_default(64, 64, opencv::core::CV_8UC1, Scalar::all(128.0))
                .unwrap();
        let mut extractor = FeatureExtractor::new(CaptureMode::Camera, 0.04).unwrap();
        let features = extractor.extract(&image, None).unwrap();

        assert!(features.is_empty());
        assert_eq!(features.descriptors.rows(), 0);
        assert!(features.flatten().unwrap().is_empty());
    }

    #[test]
    fn test_flatten_is_row_major() {
        let image = textured_image(128);
        let mut extractor = FeatureExtractor::new(CaptureMode::Camera, 0.02).unwrap();
        let features = extractor.extract(&image, None).unwrap();
        let flat = features.flatten().unwrap();

        assert_eq!(
            flat.len(),
            features.len() * DESCRIPTOR_LENGTH as usize
        );
        // Spot-check the first row against the matrix.
        for j in 0..DESCRIPTOR_LENGTH {
            assert_eq!(
                flat[j as usize],
                *features.descriptors.at_2d::<f32>(0, j).unwrap()
            );
        }
    }

    #[test]
    fn test_mask_suppresses_masked_regions() {
        let image = textured_image(128);
        // Mask out everything: no keypoints may survive.
        let mask =
            Mat::new_rows_cols_with_default(128, 128, opencv::core::CV_8UC1, Scalar::all(0.0))
                .unwrap();
        let mut extractor = FeatureExtractor::new(CaptureMode::Camera, 0.02).unwrap();
        let features = extractor.extract(&image, Some(&mask)).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_sonar_mode_extracts() {
        let image = textured_image(128);
        let mut extractor = FeatureExtractor::new(CaptureMode::Sonar, 0.02).unwrap();
        let features = extractor.extract(&image, None).unwrap();
        assert_eq!(features.descriptors.rows() as usize, features.len());
    }
}
