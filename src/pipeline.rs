//! Per-frame processing pipeline.
//!
//! Each arriving frame runs synchronously through: decimator gate →
//! mode-specific preprocessing → feature extraction → frame-cache insert →
//! descriptor and keypoint-overlay publication. Frames are processed one at
//! a time; only the frame cache is shared with other threads.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use opencv::core::{Mat, Scalar};
use opencv::features2d;
use opencv::prelude::*;
use tracing::debug;

use crate::cache::FrameCache;
use crate::config::{CaptureMode, PerceptionConfig};
use crate::decimation::FrameDecimator;
use crate::extraction::{FeatureExtractor, FeatureSet};
use crate::messages::{DescriptorsMsg, Frame, FrameHeader, KeypointImageMsg};
use crate::preprocess::{self, SonarMask};

/// Summary of one processed (non-decimated) frame.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub seq: u32,
    pub keypoint_count: usize,
}

/// The online perception pipeline.
///
/// Construction loads everything the configured mode needs up front: the
/// extractor with mode-specific layering and, in sonar mode, the static
/// validity mask. A bad mask path is a construction error, not a runtime one.
pub struct PerceptionPipeline {
    mode: CaptureMode,
    decimator: FrameDecimator,
    extractor: FeatureExtractor,
    sonar_mask: Option<SonarMask>,
    cache: Arc<FrameCache>,
    descriptors_tx: Sender<DescriptorsMsg>,
    keypoints_tx: Sender<KeypointImageMsg>,
}

impl PerceptionPipeline {
    pub fn new(
        config: &PerceptionConfig,
        cache: Arc<FrameCache>,
        descriptors_tx: Sender<DescriptorsMsg>,
        keypoints_tx: Sender<KeypointImageMsg>,
    ) -> Result<Self> {
        let sonar_mask = match config.mode {
            CaptureMode::Sonar => Some(SonarMask::load(&config.sonar.mask)?),
            CaptureMode::Camera => None,
        };
        let extractor = FeatureExtractor::new(config.mode, config.detection_threshold)?;

        Ok(Self {
            mode: config.mode,
            decimator: FrameDecimator::new(config.frames_to_jump),
            extractor,
            sonar_mask,
            cache,
            descriptors_tx,
            keypoints_tx,
        })
    }

    /// Run one frame through the pipeline.
    ///
    /// Returns `Ok(None)` when the decimator dropped the frame; the drop
    /// still advances the decimation counter but has no other effect.
    pub fn process_frame(&mut self, frame: Frame) -> Result<Option<ProcessedFrame>> {
        if !self.decimator.should_process() {
            return Ok(None);
        }

        let conditioned = preprocess::prepare(&frame.image, self.mode)?;
        let mask = self.sonar_mask.as_ref().map(|m| m.as_mat());
        let features = self.extractor.extract(&conditioned, mask)?;

        debug!(
            seq = frame.header.seq,
            keypoints = features.len(),
            "frame processed"
        );

        self.cache.insert(frame.header.seq, conditioned.clone());
        self.publish_descriptors(&frame.header, &features)?;
        self.publish_keypoint_image(&frame.header, &conditioned, &features)?;

        Ok(Some(ProcessedFrame {
            seq: frame.header.seq,
            keypoint_count: features.len(),
        }))
    }

    /// Shared handle to the frame cache, for the retrieval service.
    pub fn cache(&self) -> Arc<FrameCache> {
        Arc::clone(&self.cache)
    }

    fn publish_descriptors(&self, header: &FrameHeader, features: &FeatureSet) -> Result<()> {
        let msg = DescriptorsMsg {
            header: header.clone(),
            descriptor_count: features.descriptors.rows(),
            descriptor_length: features.descriptors.cols(),
            data: features.flatten()?,
        };
        self.descriptors_tx
            .send(msg)
            .map_err(|_| anyhow!("descriptor channel disconnected"))
    }

    fn publish_keypoint_image(
        &self,
        header: &FrameHeader,
        conditioned: &Mat,
        features: &FeatureSet,
    ) -> Result<()> {
        let mut overlay = Mat::default();
        features2d::draw_keypoints(
            conditioned,
            &features.keypoints,
            &mut overlay,
            Scalar::all(-1.0),
            features2d::DrawMatchesFlags::DEFAULT,
        )?;
        self.keypoints_tx
            .send(KeypointImageMsg {
                header: header.clone(),
                image: overlay,
            })
            .map_err(|_| anyhow!("keypoint image channel disconnected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use opencv::prelude::*;

    fn textured_frame(seq: u32) -> Frame {
        let rows: Vec<Vec<u8>> = (0..128)
            .map(|y: i32| {
                (0..128)
                    .map(|x: i32| (((x * 7 + y * 13) % 251) as u16 * (1 + (x + y) % 3) as u16 % 256) as u8)
                    .collect()
            })
            .collect();
        Frame {
            header: FrameHeader {
                seq,
                stamp_ns: seq as u64 * 1_000_000,
                frame_id: "image_raw".to_string(),
            },
            image: Mat::from_slice_2d(&rows).unwrap(),
        }
    }

    fn camera_pipeline(
        frames_to_jump: u32,
    ) -> (
        PerceptionPipeline,
        Arc<FrameCache>,
        crossbeam_channel::Receiver<DescriptorsMsg>,
        crossbeam_channel::Receiver<KeypointImageMsg>,
    ) {
        let config = PerceptionConfig {
            frames_to_jump,
            detection_threshold: 0.02,
            ..PerceptionConfig::default()
        };
        let cache = Arc::new(FrameCache::new());
        let (desc_tx, desc_rx) = unbounded();
        let (kp_tx, kp_rx) = unbounded();
        let pipeline =
            PerceptionPipeline::new(&config, Arc::clone(&cache), desc_tx, kp_tx).unwrap();
        (pipeline, cache, desc_rx, kp_rx)
    }

    #[test]
    fn test_three_frames_stride_two_processes_two() {
        let (mut pipeline, cache, desc_rx, kp_rx) = camera_pipeline(2);

        let mut processed = Vec::new();
        for seq in 0..3 {
            if let Some(result) = pipeline.process_frame(textured_frame(seq)).unwrap() {
                processed.push(result.seq);
            }
        }

        assert_eq!(processed, vec![0, 2]);
        drop(pipeline);
        assert_eq!(desc_rx.iter().count(), 2);
        assert_eq!(kp_rx.iter().count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_descriptor_message_shape() {
        let (mut pipeline, _cache, desc_rx, _kp_rx) = camera_pipeline(0);

        pipeline.process_frame(textured_frame(17)).unwrap().unwrap();
        let msg = desc_rx.recv().unwrap();

        assert_eq!(msg.header.seq, 17);
        assert_eq!(
            msg.data.len(),
            (msg.descriptor_count * msg.descriptor_length) as usize
        );
        assert_eq!(msg.descriptor_length, crate::extraction::DESCRIPTOR_LENGTH);
    }

    #[test]
    fn test_processed_frame_is_retrievable() {
        let (mut pipeline, cache, _desc_rx, _kp_rx) = camera_pipeline(0);

        pipeline.process_frame(textured_frame(4)).unwrap().unwrap();
        let image = cache.retrieve(4).expect("frame 4 was cached");
        assert_eq!(image.rows(), 128);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_decimated_frame_publishes_nothing() {
        let (mut pipeline, cache, desc_rx, kp_rx) = camera_pipeline(2);

        pipeline.process_frame(textured_frame(0)).unwrap().unwrap();
        // Frame 1 is dropped by the gate.
        assert!(pipeline.process_frame(textured_frame(1)).unwrap().is_none());

        drop(pipeline);
        assert_eq!(desc_rx.iter().count(), 1);
        assert_eq!(kp_rx.iter().count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overlay_matches_frame_header() {
        let (mut pipeline, _cache, _desc_rx, kp_rx) = camera_pipeline(0);

        pipeline.process_frame(textured_frame(8)).unwrap().unwrap();
        let msg = kp_rx.recv().unwrap();
        assert_eq!(msg.header.seq, 8);
        assert!(!msg.image.empty());
    }
}
