//! Stream controller pacing raw media into encoder relays.
//!
//! This crate turns application video frames and audio samples into raw
//! payloads, paces audio to one chunk per frame, and manages the relays and
//! encoder process that carry them to a live-streaming endpoint.

mod controller;
mod error;
mod media;
mod metrics;
mod state;

pub use controller::{PushOptions, StreamController};
pub use error::EngineError;
pub use media::{
    audio_payloads, audio_samples, expected_samples, split_even, video_payloads, MediaArray,
    SampleType,
};
pub use metrics::MetricsCollector;

pub use rawcast_ipc::{
    MediaKind, RelayState, Resolution, SessionState, StopStatus, StreamConfig, StreamMetrics,
};

use std::time::Duration;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// How long `push` waits for a free channel slot by default.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(15);
