//! Streams a synthetic test pattern through rawcast.
//!
//! Usage: `rawcast-demo <config.json> [seconds]`

mod pattern;

use std::fs;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rawcast_engine::{expected_samples, StopStatus, StreamConfig, StreamController};

const DEFAULT_SECONDS: u64 = 10;

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rawcast_engine=debug,rawcast_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &str) -> Result<StreamConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let config: StreamConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path))?;
    Ok(config)
}

fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        bail!("usage: rawcast-demo <config.json> [seconds]");
    };
    let seconds = match args.next() {
        Some(s) => s.parse().context("seconds must be a whole number")?,
        None => DEFAULT_SECONDS,
    };

    let config = load_config(&config_path)?;
    let resolution = config.resolution;
    let fps = config.fps;
    let sample_rate = config.audio_sample_rate();
    let total_frames = (seconds as f64 * fps).round() as u64;

    info!(%resolution, fps, ?sample_rate, total_frames, "Streaming test pattern");

    let mut controller = StreamController::new(config)?;
    controller.start()?;

    let mut samples_sent = 0u64;
    for index in 0..total_frames {
        let frame = pattern::color_bars(resolution, index);

        let audio = sample_rate.map(|rate| {
            // Paced against the running total so fractional rates don't drift.
            let due = expected_samples(rate, fps, index as usize + 1) as u64;
            let count = (due - samples_sent) as usize;
            let tone = pattern::tone(rate, samples_sent, count);
            samples_sent = due;
            tone
        });

        if let Err(e) = controller.push(&frame, audio.as_ref()) {
            warn!("Push failed, ending stream: {}", e);
            break;
        }

        if index > 0 && index % (fps.round() as u64).max(1) == 0 {
            let metrics = controller.metrics();
            info!(
                frames = metrics.frames_pushed,
                video_queue = metrics.video_queue_len,
                audio_queue = metrics.audio_queue_len,
                bytes_sent = metrics.bytes_sent,
                "Progress"
            );
        }
    }

    match controller.stop() {
        StopStatus::EncoderTimedOut => warn!("Encoder did not exit in time"),
        status => info!("{}", status.message()),
    }

    Ok(())
}
