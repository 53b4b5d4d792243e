//! Recorded-session replay.
//!
//! A session is a directory with one subdirectory per named image stream:
//!
//! ```text
//! <session>/<stream>/data.csv       timestamp_ns,filename (# comments allowed)
//! <session>/<stream>/data/<file>    grayscale frames
//! ```
//!
//! Sequence numbers are assigned from the stored order. Frames are loaded
//! lazily so a long session never has to fit in memory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use opencv::prelude::*;
use opencv::{imgcodecs, imgcodecs::IMREAD_GRAYSCALE};

use crate::messages::{Frame, FrameHeader};

/// One row of a stream's index.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub seq: u32,
    pub timestamp_ns: u64,
    pub filename: String,
}

/// A replayable recorded session rooted at a directory.
#[derive(Debug)]
pub struct RecordedSession {
    root: PathBuf,
}

impl RecordedSession {
    /// Open a session directory. Fails if the directory does not exist.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            bail!(
                "recorded session {} does not exist or is not a directory",
                root.display()
            );
        }
        Ok(Self { root })
    }

    /// Open a named image stream within the session.
    pub fn stream(&self, name: &str) -> Result<ImageStream> {
        let dir = self.root.join(name);
        let entries = load_image_list(dir.join("data.csv"))?;
        Ok(ImageStream {
            name: name.to_string(),
            data_dir: dir.join("data"),
            entries,
        })
    }
}

/// A single image stream of a recorded session.
#[derive(Debug)]
pub struct ImageStream {
    name: String,
    data_dir: PathBuf,
    pub entries: Vec<ImageEntry>,
}

impl ImageStream {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the frame at the given index from disk.
    pub fn frame(&self, idx: usize) -> Result<Frame> {
        let entry = self
            .entries
            .get(idx)
            .with_context(|| format!("no frame at index {} in stream {}", idx, self.name))?;

        let path = self.data_dir.join(&entry.filename);
        let path_str = path
            .to_str()
            .with_context(|| format!("frame path {} is not valid UTF-8", path.display()))?;
        let image = imgcodecs::imread(path_str, IMREAD_GRAYSCALE)
            .with_context(|| format!("failed to read frame {}", path.display()))?;
        if image.empty() {
            bail!("frame {} is missing or not a readable image", path.display());
        }

        Ok(Frame {
            header: FrameHeader {
                seq: entry.seq,
                stamp_ns: entry.timestamp_ns,
                frame_id: self.name.clone(),
            },
            image,
        })
    }
}

fn load_image_list(csv_path: PathBuf) -> Result<Vec<ImageEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(&csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let ts: u64 = rec[0].trim().parse()?;
        let filename = rec[1].trim().to_string();
        entries.push(ImageEntry {
            seq: entries.len() as u32,
            timestamp_ns: ts,
            filename,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Mat, Scalar, Vector};
    use std::fs;

    fn scratch_session(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "dolphin_vision_session_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("image_raw/data")).unwrap();
        root
    }

    fn write_frame(root: &Path, filename: &str, value: u8) {
        let image =
            Mat::new_rows_cols_with_default(8, 8, opencv::core::CV_8UC1, Scalar::all(value as f64))
                .unwrap();
        let path = root.join("image_raw/data").join(filename);
        imgcodecs::imwrite(path.to_str().unwrap(), &image, &Vector::<i32>::new()).unwrap();
    }

    #[test]
    fn test_missing_session_is_an_error() {
        let err = RecordedSession::open("/nonexistent/session").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/session"));
    }

    #[test]
    fn test_stream_replay_assigns_sequence_numbers() {
        let root = scratch_session("replay");
        fs::write(
            root.join("image_raw/data.csv"),
            "# timestamp_ns,filename\n1000,f0.png\n2000,f1.png\n",
        )
        .unwrap();
        write_frame(&root, "f0.png", 10);
        write_frame(&root, "f1.png", 20);

        let session = RecordedSession::open(&root).unwrap();
        let stream = session.stream("image_raw").unwrap();
        assert_eq!(stream.len(), 2);

        let frame = stream.frame(1).unwrap();
        assert_eq!(frame.header.seq, 1);
        assert_eq!(frame.header.stamp_ns, 2000);
        assert_eq!(frame.header.frame_id, "image_raw");
        assert_eq!(*frame.image.at_2d::<u8>(0, 0).unwrap(), 20);
        assert_eq!(frame.image.channels(), 1);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_stream_is_an_error() {
        let root = scratch_session("nostream");
        let session = RecordedSession::open(&root).unwrap();
        assert!(session.stream("sonar").is_err());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_index_past_end_is_an_error() {
        let root = scratch_session("pastend");
        fs::write(root.join("image_raw/data.csv"), "1000,f0.png\n").unwrap();
        write_frame(&root, "f0.png", 1);

        let stream = RecordedSession::open(&root)
            .unwrap()
            .stream("image_raw")
            .unwrap();
        assert!(stream.frame(5).is_err());

        fs::remove_dir_all(&root).unwrap();
    }
}
