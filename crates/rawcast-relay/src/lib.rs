//! Loopback TCP relays feeding raw media to an encoder.
//!
//! A [`RelayServer`] owns one listening socket, accepts exactly one
//! connection from the encoder and drains a [`BoundedChannel`] onto it from a
//! background thread until stopped.

mod channel;
mod error;
mod listener;
mod server;

pub use channel::BoundedChannel;
pub use error::{ChannelError, RelayError};
pub use listener::CancellableListener;
pub use server::{RelayServer, RelayStatistics};

use std::time::Duration;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// How long the relay thread waits on an empty channel before re-checking
/// the stop flag.
pub const POP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pending connections the listening socket keeps.
pub const LISTEN_BACKLOG: i32 = 5;
