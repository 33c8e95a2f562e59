//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur while launching or waiting on the encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder process could not be started.
    #[error("Failed to spawn encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid launch parameters.
    #[error("Invalid encoder configuration: {0}")]
    InvalidConfig(String),

    /// Waiting on the process failed.
    #[error("Failed to wait on encoder: {0}")]
    Wait(#[source] std::io::Error),
}
