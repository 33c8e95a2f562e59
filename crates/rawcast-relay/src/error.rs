//! Error types for the relay module.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a relay server.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The bind address could not be resolved.
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    /// Relay servers are single-use.
    #[error("Relay server already started")]
    AlreadyStarted,

    /// The relay has not been bound yet.
    #[error("Relay server not started")]
    NotStarted,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`crate::BoundedChannel`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// No slot became free within the timeout.
    #[error("Channel full for {0:?}")]
    Full(Duration),

    /// The other side of the channel is gone.
    #[error("Channel disconnected")]
    Disconnected,
}
