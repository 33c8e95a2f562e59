//! Shared configuration and state types for rawcast.
//!
//! This crate defines the plain-data types exchanged between the relay,
//! encoder and engine crates, plus the stream configuration that callers
//! load from disk or build in code.

mod state;
mod types;

pub use state::{RelayState, SessionState, StopStatus};
pub use types::{ConfigError, MediaKind, Resolution, StreamConfig, StreamMetrics};

/// Default number of payloads buffered per media channel.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 25;

/// Default seconds `stop()` waits for the encoder to exit.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Default host the relays bind to and the encoder dials.
pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1";

/// Default encoder executable.
pub const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";
