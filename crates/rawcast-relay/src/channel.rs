//! Bounded payload queue between the producer and a relay thread.

use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::error::ChannelError;

/// Fixed-capacity FIFO of opaque payloads.
///
/// Cloning yields another handle to the same queue. The controller keeps one
/// handle for pushing and the relay thread keeps one for popping.
#[derive(Debug, Clone)]
pub struct BoundedChannel {
    sender: Sender<Bytes>,
    receiver: Receiver<Bytes>,
    capacity: usize,
}

impl BoundedChannel {
    /// Create a channel holding at most `capacity` payloads.
    ///
    /// A capacity of zero is raised to one; a rendezvous queue cannot buffer
    /// a frame ahead of the encoder.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);

        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Enqueue a payload, blocking up to `timeout` for a free slot.
    pub fn push_timeout(&self, payload: Bytes, timeout: Duration) -> Result<(), ChannelError> {
        self.sender
            .send_timeout(payload, timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => ChannelError::Full(timeout),
                SendTimeoutError::Disconnected(_) => ChannelError::Disconnected,
            })
    }

    /// Dequeue the oldest payload, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Bytes>, ChannelError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    /// Number of payloads waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if no payloads are waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Check if every slot is taken.
    pub fn is_full(&self) -> bool {
        self.sender.is_full()
    }

    /// Maximum number of payloads held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
