use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use dolphin_vision::config::CaptureMode;
use dolphin_vision::decimation::FrameDecimator;
use dolphin_vision::extraction::FeatureExtractor;
use dolphin_vision::io::session::RecordedSession;
use dolphin_vision::preprocess;
use dolphin_vision::vocabulary::{TrainError, VocabularyTrainer};

/// Train a bag-of-features vocabulary from a recorded session.
#[derive(Parser)]
#[command(name = "bof_training")]
struct Args {
    /// Recorded session directory to replay.
    session: PathBuf,

    /// Image stream within the session.
    #[arg(long, default_value = "image_raw")]
    stream: String,

    /// Capture mode the session was recorded in (camera or sonar).
    #[arg(long, default_value = "camera")]
    mode: String,

    /// Feature detection sensitivity (SIFT contrast threshold).
    #[arg(long, default_value_t = 0.04)]
    threshold: f64,

    /// Number of vocabulary groups (k-means centroids).
    #[arg(long, default_value_t = 100)]
    groups: usize,

    /// Process one frame out of every N (0 processes all).
    #[arg(long, default_value_t = 10)]
    frames_to_jump: u32,

    /// Output directory for the vocabulary artifact.
    #[arg(long, default_value = "bof_vocabularies")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mode: CaptureMode = args.mode.parse().map_err(anyhow::Error::msg)?;

    let session = RecordedSession::open(&args.session)
        .with_context(|| format!("failed to open recorded session {}", args.session.display()))?;
    let stream = session.stream(&args.stream)?;
    info!(
        stream = stream.name(),
        frames = stream.len(),
        "recorded session opened"
    );

    let mut decimator = FrameDecimator::new(args.frames_to_jump);
    let mut extractor = FeatureExtractor::new(mode, args.threshold)?;
    let mut trainer = VocabularyTrainer::new(args.groups, args.threshold);

    let mut consumed = 0usize;
    for idx in 0..stream.len() {
        if !decimator.should_process() {
            continue;
        }
        let frame = stream.frame(idx)?;
        let conditioned = preprocess::prepare(&frame.image, mode)?;
        let features = extractor.extract(&conditioned, None)?;
        trainer.add_descriptors(&features.descriptors)?;
        consumed += 1;
    }
    info!(
        frames = consumed,
        descriptors = trainer.descriptor_count(),
        "session replay finished"
    );

    info!(
        threshold = trainer.threshold(),
        groups = trainer.groups(),
        "training vocabulary"
    );
    let vocabulary = match trainer.train() {
        Ok(vocabulary) => vocabulary,
        Err(TrainError::InsufficientData {
            available,
            requested,
        }) => {
            bail!(
                "not enough training data: {available} descriptors for {requested} groups; \
                 record a longer session or lower --groups"
            );
        }
        Err(e) => return Err(e.into()),
    };
    info!("training complete");

    let path = vocabulary.save(&args.output)?;
    info!(artifact = %path.display(), "vocabulary written");
    Ok(())
}
