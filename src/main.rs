use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing::info;

use dolphin_vision::cache::FrameCache;
use dolphin_vision::config::PerceptionConfig;
use dolphin_vision::io::session::RecordedSession;
use dolphin_vision::pipeline::PerceptionPipeline;

/// Perception node: replays a recorded session through the per-frame
/// pipeline, publishing descriptors and keypoint overlays.
#[derive(Parser)]
#[command(name = "perception_node")]
struct Args {
    /// Recorded session to replay as the inbound frame feed.
    session: PathBuf,

    /// Perception configuration YAML.
    #[arg(long, default_value = "config/perception.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = PerceptionConfig::load(&args.config)?;
    info!(mode = %config.mode, threshold = config.detection_threshold, "perception node starting");

    let session = RecordedSession::open(&args.session)?;
    let stream = session.stream(config.active_stream())?;
    info!(
        stream = stream.name(),
        transport = config.transport_hint(),
        frames = stream.len(),
        "subscribed to image stream"
    );

    let cache = Arc::new(FrameCache::new());
    let (descriptors_tx, descriptors_rx) = unbounded();
    let (keypoints_tx, keypoints_rx) = unbounded();
    let mut pipeline =
        PerceptionPipeline::new(&config, Arc::clone(&cache), descriptors_tx, keypoints_tx)?;

    // Stand-ins for the downstream subscribers: drain each publication
    // channel until the pipeline drops its senders.
    let descriptor_sink = thread::spawn(move || descriptors_rx.iter().count());
    let keypoint_sink = thread::spawn(move || keypoints_rx.iter().count());

    let mut processed = 0usize;
    for idx in 0..stream.len() {
        let frame = stream.frame(idx)?;
        if let Some(result) = pipeline.process_frame(frame)? {
            processed += 1;
            if processed % 100 == 0 {
                info!(
                    seq = result.seq,
                    keypoints = result.keypoint_count,
                    processed,
                    "replay progress"
                );
            }
        }
    }

    drop(pipeline);
    let descriptors = descriptor_sink.join().expect("descriptor sink panicked");
    let overlays = keypoint_sink.join().expect("keypoint sink panicked");

    info!(
        processed,
        descriptors,
        overlays,
        retained = cache.len(),
        "replay complete"
    );
    Ok(())
}
