//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;

use rawcast_encoder::EncoderError;
use rawcast_ipc::{ConfigError, MediaKind};
use rawcast_relay::RelayError;

/// Errors surfaced by [`crate::StreamController`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// `push` was called while the controller is not running.
    #[error("Stream is not running; call start() first")]
    NotRunning,

    /// Media array has the wrong shape.
    #[error("Invalid media shape: {0}")]
    Shape(String),

    /// Media array has the wrong element type.
    #[error("Invalid media type: {0}")]
    Dtype(String),

    /// A channel stayed full for the whole push timeout.
    #[error(
        "Timed out after {timeout:?} enqueuing {kind} data; \
         increase max_queue_size or consume faster"
    )]
    Backpressure { kind: MediaKind, timeout: Duration },

    /// A channel lost its consumer handle.
    #[error("The {0} channel is closed")]
    ChannelClosed(MediaKind),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Relay error.
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Encoder error.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),
}
