//! Session counters and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use rawcast_ipc::{MediaKind, StreamMetrics};

/// Collects per-session push statistics.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    frames_pushed: AtomicU64,
    audio_chunks_pushed: AtomicU64,
    bytes_enqueued: AtomicU64,
    backpressure_failures: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            frames_pushed: AtomicU64::new(0),
            audio_chunks_pushed: AtomicU64::new(0),
            bytes_enqueued: AtomicU64::new(0),
            backpressure_failures: AtomicU64::new(0),
        }
    }

    /// Start a new session: reset counters and the uptime clock.
    pub fn start(&self) {
        self.frames_pushed.store(0, Ordering::Relaxed);
        self.audio_chunks_pushed.store(0, Ordering::Relaxed);
        self.bytes_enqueued.store(0, Ordering::Relaxed);
        self.backpressure_failures.store(0, Ordering::Relaxed);
        *self.start_time.write() = Some(Instant::now());
    }

    /// Stop the uptime clock.
    pub fn stop(&self) {
        let snapshot = self.snapshot(0, 0, 0);
        debug!(
            frames = snapshot.frames_pushed,
            audio_chunks = snapshot.audio_chunks_pushed,
            bytes = snapshot.bytes_enqueued,
            backpressure_failures = snapshot.backpressure_failures,
            "Session totals"
        );
        *self.start_time.write() = None;
    }

    /// Record one payload accepted by a channel.
    pub fn record_enqueued(&self, kind: MediaKind, bytes: usize) {
        match kind {
            MediaKind::Video => self.frames_pushed.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.audio_chunks_pushed.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_enqueued.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a push that failed on a full channel.
    pub fn record_backpressure(&self) {
        self.backpressure_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, video_queue_len: usize, audio_queue_len: usize, bytes_sent: u64) -> StreamMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        StreamMetrics {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            audio_chunks_pushed: self.audio_chunks_pushed.load(Ordering::Relaxed),
            bytes_enqueued: self.bytes_enqueued.load(Ordering::Relaxed),
            backpressure_failures: self.backpressure_failures.load(Ordering::Relaxed),
            video_queue_len,
            audio_queue_len,
            bytes_sent,
            uptime_seconds,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
