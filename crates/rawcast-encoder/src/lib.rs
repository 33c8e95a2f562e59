//! External encoder process fed from rawcast relays.
//!
//! The encoder reads raw BGR24 frames and f32 mono samples from loopback TCP
//! sources and publishes one H.264/AAC stream to the configured sink. This
//! crate only builds its invocation, launches it and waits for it to exit.

mod error;
mod ffmpeg;

pub use error::EncoderError;
pub use ffmpeg::{ffmpeg_args, FfmpegLauncher, FfmpegProcess};

use std::time::Duration;

use rawcast_ipc::{Resolution, StreamConfig};

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Interval between exit checks while waiting on the encoder.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Build a `tcp://host:port` input source.
pub fn tcp_source(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("tcp://[{}]:{}", host, port)
    } else {
        format!("tcp://{}:{}", host, port)
    }
}

/// Everything the encoder needs to be launched for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Raw video input, e.g. `tcp://127.0.0.1:40000`.
    pub video_source: String,

    /// Raw audio input, if audio is streamed.
    pub audio_source: Option<String>,

    /// Output sink.
    pub output_url: String,

    /// Frame size.
    pub resolution: Resolution,

    /// Frames per second.
    pub fps: f64,

    /// Audio sample rate in Hz.
    pub sample_rate: Option<u32>,
}

impl EncoderConfig {
    /// Derive the launch parameters for a stream from its relay sources.
    pub fn for_stream(
        stream: &StreamConfig,
        video_source: String,
        audio_source: Option<String>,
    ) -> Self {
        Self {
            video_source,
            audio_source,
            output_url: stream.server_url.clone(),
            resolution: stream.resolution,
            fps: stream.fps,
            sample_rate: stream.audio_sample_rate(),
        }
    }

    /// Check that the parameters are consistent.
    pub fn validate(&self) -> EncoderResult<()> {
        if self.audio_source.is_some() && self.sample_rate.is_none() {
            return Err(EncoderError::InvalidConfig(
                "audio source given without a sample rate".into(),
            ));
        }

        if self.output_url.is_empty() {
            return Err(EncoderError::InvalidConfig("empty output url".into()));
        }

        Ok(())
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,

    /// Whether the process reported success.
    pub success: bool,
}

/// A running encoder.
pub trait EncoderProcess: Send {
    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns `Ok(None)` if it is still running when the timeout elapses.
    /// The process is never killed.
    fn wait_timeout(&mut self, timeout: Duration) -> EncoderResult<Option<EncoderExit>>;

    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;
}

/// Starts encoder processes.
pub trait EncoderLauncher: Send + Sync {
    /// Launch an encoder for the given inputs.
    fn launch(&self, config: &EncoderConfig) -> EncoderResult<Box<dyn EncoderProcess>>;

    /// Get launcher name for diagnostics.
    fn name(&self) -> &'static str;
}
