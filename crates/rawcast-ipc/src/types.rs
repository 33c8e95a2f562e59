//! Common types used across the relay, encoder and engine crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    DEFAULT_ENCODER_PROGRAM, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_RELAY_HOST,
    DEFAULT_STOP_TIMEOUT_SECS,
};

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size in bytes of one packed BGR24 frame at this resolution.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Media carried by a relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Raw BGR24 video frames.
    Video,

    /// Raw f32 mono audio chunks.
    Audio,
}

impl MediaKind {
    /// Returns a lowercase name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Name given to the relay thread serving this media.
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::Video => "VideoStreamSender",
            Self::Audio => "AudioStreamSender",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Invalid stream configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("Invalid resolution: {0}")]
    InvalidResolution(Resolution),

    /// Frame rate is zero, negative or not finite.
    #[error("Invalid frame rate: {0}")]
    InvalidFps(f64),

    /// Audio is enabled but no sample rate was given.
    #[error("A sample rate is required unless audio is disabled")]
    MissingSampleRate,

    /// Sample rate is zero.
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// Queue capacity is zero.
    #[error("max_queue_size must be at least 1")]
    InvalidQueueSize,
}

/// Configuration for one streaming controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Output sink handed to the encoder (e.g. "rtmp://localhost/live/stream").
    pub server_url: String,

    /// Video frame size.
    pub resolution: Resolution,

    /// Video frames per second.
    pub fps: f64,

    /// Audio sample rate in Hz. Required unless audio is disabled.
    #[serde(default)]
    pub sample_rate: Option<u32>,

    /// Payloads buffered per channel before `push` blocks (default: 25).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Whether an audio relay is created alongside the video relay.
    #[serde(default = "default_true")]
    pub audio_enabled: bool,

    /// Surface the encoder's own output and log its command line.
    #[serde(default = "default_true")]
    pub show_log: bool,

    /// Suppress the sample-rate/fps divisibility advisory.
    #[serde(default)]
    pub disable_warning: bool,

    /// Host the relays bind to and the encoder connects to.
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    /// Video relay port (0 picks an ephemeral port).
    #[serde(default)]
    pub video_port: u16,

    /// Audio relay port (0 picks an ephemeral port).
    #[serde(default)]
    pub audio_port: u16,

    /// Encoder executable.
    #[serde(default = "default_encoder_program")]
    pub encoder_program: String,

    /// Seconds `stop()` waits for the encoder to exit (default: 60).
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_true() -> bool {
    true
}

fn default_relay_host() -> String {
    DEFAULT_RELAY_HOST.to_string()
}

fn default_encoder_program() -> String {
    DEFAULT_ENCODER_PROGRAM.to_string()
}

fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

impl StreamConfig {
    /// Create a configuration with audio enabled and default options.
    pub fn new(
        server_url: impl Into<String>,
        resolution: Resolution,
        fps: f64,
        sample_rate: u32,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            resolution,
            fps,
            sample_rate: Some(sample_rate),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            audio_enabled: true,
            show_log: true,
            disable_warning: false,
            relay_host: default_relay_host(),
            video_port: 0,
            audio_port: 0,
            encoder_program: default_encoder_program(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }

    /// Create a video-only configuration.
    pub fn video_only(server_url: impl Into<String>, resolution: Resolution, fps: f64) -> Self {
        Self {
            sample_rate: None,
            audio_enabled: false,
            ..Self::new(server_url, resolution, fps, 0)
        }
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }

        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::InvalidFps(self.fps));
        }

        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }

        if self.audio_enabled {
            match self.sample_rate {
                None => return Err(ConfigError::MissingSampleRate),
                Some(0) => return Err(ConfigError::InvalidSampleRate(0)),
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Returns true when audio is enabled and the sample rate is not a
    /// whole multiple of the frame rate, so per-frame audio chunks drift.
    pub fn has_sync_drift(&self) -> bool {
        match self.sample_rate {
            Some(rate) if self.audio_enabled => (rate as f64 % self.fps) != 0.0,
            _ => false,
        }
    }

    /// Effective audio sample rate, if audio is streamed.
    pub fn audio_sample_rate(&self) -> Option<u32> {
        if self.audio_enabled {
            self.sample_rate
        } else {
            None
        }
    }

    /// How long `stop()` waits for the encoder.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Snapshot of a running session's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Video frames accepted by `push`.
    pub frames_pushed: u64,

    /// Audio chunks accepted by `push`.
    pub audio_chunks_pushed: u64,

    /// Payload bytes enqueued across both channels.
    pub bytes_enqueued: u64,

    /// Pushes that failed because a channel stayed full.
    pub backpressure_failures: u64,

    /// Payloads currently waiting in the video channel.
    pub video_queue_len: usize,

    /// Payloads currently waiting in the audio channel.
    pub audio_queue_len: usize,

    /// Bytes written to the encoder by the relays.
    pub bytes_sent: u64,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}
