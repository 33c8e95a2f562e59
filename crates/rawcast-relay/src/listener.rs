//! TCP listener whose blocking `accept` can be cancelled from another thread.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::{RelayResult, LISTEN_BACKLOG};

/// How long `cancel` waits when dialing the listener to wake `accept`.
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// A bound listening socket.
///
/// `accept` blocks without a timeout. `cancel` makes any pending or future
/// `accept` return an error, which is how a relay that never sees its
/// encoder is still able to shut down.
#[derive(Debug)]
pub struct CancellableListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    cancelled: AtomicBool,
}

impl CancellableListener {
    /// Bind and listen on `addr`.
    pub fn bind(addr: SocketAddr) -> RelayResult<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        // Lets a stopped relay's port be bound again straight away. Windows
        // would also let it share a port another listener holds.
        #[cfg(unix)]
        socket.set_reuse_address(true)?;

        socket
            .bind(&addr.into())
            .and_then(|()| socket.listen(LISTEN_BACKLOG))
            .map_err(|source| RelayError::Bind { addr, source })?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Address the socket is bound to, with the OS-assigned port filled in.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for one inbound connection.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }

        let (stream, peer) = self.listener.accept()?;

        // The wake-up dial from `cancel` lands here too.
        if self.is_cancelled() {
            trace!(%peer, "Dropping connection accepted after cancel");
            return Err(cancelled_error());
        }

        Ok((stream, peer))
    }

    /// Unblock a pending `accept` and refuse all later ones.
    ///
    /// Calling this more than once is harmless.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(local_addr = %self.local_addr, "Cancelling listener");

        // Linux fails a blocked accept once the socket is shut down. Other
        // platforms need a connection to arrive, so dial it as well.
        let _ = SockRef::from(&self.listener).shutdown(Shutdown::Both);
        let _ = TcpStream::connect_timeout(&self.wake_addr(), WAKE_CONNECT_TIMEOUT);
    }

    /// Check if `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "listener cancelled")
}
