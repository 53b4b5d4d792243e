//! Message types crossing the node's publication boundary.
//!
//! These are the payloads handed to the hosting transport: per-frame
//! descriptor records and keypoint-overlay images, plus the inbound frame
//! representation itself.

use opencv::core::Mat;

/// Header shared by every message derived from a frame.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Sequence number assigned by the frame source. Unique per session,
    /// non-decreasing in arrival order.
    pub seq: u32,
    /// Capture timestamp in nanoseconds.
    pub stamp_ns: u64,
    /// Identifier of the originating stream.
    pub frame_id: String,
}

/// An inbound frame: header plus a single-channel intensity image (CV_8UC1).
///
/// Owned exclusively by the pipeline from arrival until its image is handed
/// to the frame cache.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub image: Mat,
}

/// Per-frame descriptor record for downstream place recognition.
pub struct DescriptorsMsg {
    pub header: FrameHeader,
    /// Number of descriptor rows (== number of keypoints).
    pub descriptor_count: i32,
    /// Length of each descriptor row.
    pub descriptor_length: i32,
    /// Row-major flattening of the descriptor matrix,
    /// `descriptor_count * descriptor_length` values.
    pub data: Vec<f32>,
}

/// The conditioned frame with detected keypoints rendered on it (BGR).
pub struct KeypointImageMsg {
    pub header: FrameHeader,
    pub image: Mat,
}
