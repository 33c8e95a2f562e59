//! Relay server: one listener, one encoder connection, one drain thread.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use rawcast_ipc::RelayState;

use crate::channel::BoundedChannel;
use crate::error::RelayError;
use crate::listener::CancellableListener;
use crate::{RelayResult, POP_POLL_INTERVAL};

/// A stalled consumer is dropped after this long rather than blocking stop.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatistics {
    pub payloads_sent: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    payloads_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Moves payloads from a [`BoundedChannel`] to exactly one TCP consumer.
///
/// A relay is single-use: once started it can only be stopped, and a stopped
/// relay never starts again.
pub struct RelayServer {
    name: String,
    channel: BoundedChannel,
    bind_host: String,
    bind_port: u16,
    state: Arc<RwLock<RelayState>>,
    listener: Option<Arc<CancellableListener>>,
    local_addr: Option<SocketAddr>,
    should_stop: Arc<AtomicBool>,
    relay_thread: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl RelayServer {
    /// Create a relay for `channel`. Nothing is bound until [`start`].
    ///
    /// A `bind_port` of 0 requests an ephemeral port.
    ///
    /// [`start`]: RelayServer::start
    pub fn new(channel: BoundedChannel, bind_host: impl Into<String>, bind_port: u16) -> Self {
        Self {
            name: "relay".to_string(),
            channel,
            bind_host: bind_host.into(),
            bind_port,
            state: Arc::new(RwLock::new(RelayState::Created)),
            listener: None,
            local_addr: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            relay_thread: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Name the relay thread (used in logs and thread listings).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind, listen and spawn the relay thread.
    #[instrument(name = "relay_start", skip(self), fields(relay = %self.name))]
    pub fn start(&mut self) -> RelayResult<()> {
        if self.state.read().has_started() {
            return Err(RelayError::AlreadyStarted);
        }

        let addr = self.resolve_bind_addr()?;
        let listener = Arc::new(CancellableListener::bind(addr)?);
        let local_addr = listener.local_addr();

        transition(&self.name, &self.state, RelayState::Listening);

        let name = self.name.clone();
        let thread_listener = Arc::clone(&listener);
        let channel = self.channel.clone();
        let state = Arc::clone(&self.state);
        let should_stop = Arc::clone(&self.should_stop);
        let counters = Arc::clone(&self.counters);

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                relay_loop(name, thread_listener, channel, state, should_stop, counters);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                listener.cancel();
                transition(&self.name, &self.state, RelayState::Stopped);
                return Err(RelayError::Io(e));
            }
        };

        info!(%local_addr, "Relay listening");

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        self.relay_thread = Some(handle);

        Ok(())
    }

    /// Port the relay is bound to. Valid once [`start`] has succeeded.
    ///
    /// [`start`]: RelayServer::start
    pub fn port(&self) -> RelayResult<u16> {
        self.local_addr
            .map(|addr| addr.port())
            .ok_or(RelayError::NotStarted)
    }

    /// Address the relay is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the relay and wait for its thread to exit.
    ///
    /// Closes the listener so a relay whose encoder never connected still
    /// terminates. A connected relay first flushes what is left in its
    /// channel. Calling this more than once is a no-op.
    #[instrument(name = "relay_stop", skip(self), fields(relay = %self.name))]
    pub fn stop(&mut self) {
        if self.state.read().is_stopped() && self.relay_thread.is_none() {
            return;
        }

        self.should_stop.store(true, Ordering::SeqCst);

        if let Some(listener) = self.listener.take() {
            listener.cancel();
        }

        if let Some(handle) = self.relay_thread.take() {
            if handle.join().is_err() {
                warn!("Relay thread panicked");
            }
        }

        transition(&self.name, &self.state, RelayState::Stopped);

        let stats = self.statistics();
        info!(
            payloads = stats.payloads_sent,
            bytes = stats.bytes_sent,
            "Relay stopped"
        );
    }

    /// Get the current relay state.
    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    /// Get the channel this relay drains.
    pub fn channel(&self) -> &BoundedChannel {
        &self.channel
    }

    /// Get relay statistics.
    pub fn statistics(&self) -> RelayStatistics {
        RelayStatistics {
            payloads_sent: self.counters.payloads_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
        }
    }

    /// Relay name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve_bind_addr(&self) -> RelayResult<SocketAddr> {
        (self.bind_host.as_str(), self.bind_port)
            .to_socket_addrs()
            .map_err(|e| RelayError::InvalidAddress(format!("{}: {}", self.bind_host, e)))?
            .next()
            .ok_or_else(|| RelayError::InvalidAddress(self.bind_host.clone()))
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn transition(name: &str, state: &RwLock<RelayState>, next: RelayState) {
    let mut current = state.write();
    if !current.can_transition_to(next) {
        trace!(relay = name, from = current.name(), to = next.name(), "Ignoring transition");
        return;
    }

    debug!(
        relay = name,
        previous = current.name(),
        current = next.name(),
        "Relay state transition"
    );
    *current = next;
}

/// Body of the relay thread.
fn relay_loop(
    name: String,
    listener: Arc<CancellableListener>,
    channel: BoundedChannel,
    state: Arc<RwLock<RelayState>>,
    should_stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let (mut stream, peer) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(relay = %name, "Accept ended: {}", e);
            transition(&name, &state, RelayState::Stopped);
            return;
        }
    };

    // Only one consumer is served.
    drop(listener);

    info!(relay = %name, %peer, "Encoder connected");
    transition(&name, &state, RelayState::Connected);

    if let Err(e) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
        warn!(relay = %name, "Failed to set write timeout: {}", e);
    }

    drain(&name, &mut stream, &channel, &state, &should_stop, &counters);

    let _ = stream.shutdown(Shutdown::Both);
    transition(&name, &state, RelayState::Stopped);
    debug!(relay = %name, "Relay loop stopped");
}

fn drain(
    name: &str,
    stream: &mut TcpStream,
    channel: &BoundedChannel,
    state: &RwLock<RelayState>,
    should_stop: &AtomicBool,
    counters: &Counters,
) {
    let mut draining = false;

    loop {
        let stopping = should_stop.load(Ordering::SeqCst);
        if stopping && !draining && state.read().is_connected() {
            transition(name, state, RelayState::Draining);
            draining = true;
        }

        match channel.pop_timeout(POP_POLL_INTERVAL) {
            Ok(Some(payload)) => {
                if let Err(e) = stream.write_all(&payload) {
                    warn!(relay = %name, "Write to encoder failed: {}", e);
                    return;
                }
                counters.payloads_sent.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes_sent
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
            }
            Ok(None) => {
                if stopping {
                    return;
                }
            }
            Err(e) => {
                debug!(relay = %name, "Channel closed: {}", e);
                return;
            }
        }
    }
}
