//! Frame retention cache serving the frame-retrieval entry point.
//!
//! Processed frames are appended here so downstream components can fetch a
//! past frame by sequence number. Insertion happens on the pipeline thread
//! while retrieval arrives from the hosting runtime's service thread, so the
//! underlying queue is guarded by a single mutex.

use std::collections::VecDeque;

use opencv::core::Mat;
use parking_lot::Mutex;

struct CacheEntry {
    seq: u32,
    image: Mat,
}

/// FIFO store of recently processed frames keyed by sequence number.
///
/// Entries accumulate without bound between retrievals; the only eviction is
/// the retrieval scan itself.
pub struct FrameCache {
    entries: Mutex<VecDeque<CacheEntry>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a frame unconditionally.
    pub fn insert(&self, seq: u32, image: Mat) {
        self.entries.lock().push_back(CacheEntry { seq, image });
    }

    /// Look up a frame by sequence number.
    ///
    /// The scan pops entries from the oldest forward and keeps going until
    /// the queue is empty, remembering the image of the last entry whose
    /// sequence matched. A single call therefore consumes the entire cache,
    /// matched or not; callers get one lookup per accumulation window.
    /// Returns `None` when no entry matched.
    pub fn retrieve(&self, seq: u32) -> Option<Mat> {
        let mut entries = self.entries.lock();
        let mut found = None;
        while let Some(entry) = entries.pop_front() {
            if entry.seq == seq {
                found = Some(entry.image);
            }
        }
        found
    }

    /// Number of frames currently retained.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all access to the queue goes through the mutex, and the cached
// `Mat`s are owned plain image buffers; the raw pointer inside `Mat` is an
// artifact of the OpenCV bindings and is never shared unsynchronized.
unsafe impl Send for FrameCache {}
unsafe impl Sync for FrameCache {}
