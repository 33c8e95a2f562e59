//! Stream controller: session lifecycle and media pacing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use rawcast_encoder::{EncoderLauncher, FfmpegLauncher};
use rawcast_ipc::{MediaKind, RelayState, SessionState, StopStatus, StreamConfig, StreamMetrics};
use rawcast_relay::ChannelError;

use crate::error::EngineError;
use crate::media::{audio_payloads, audio_samples, expected_samples, video_payloads, MediaArray};
use crate::metrics::MetricsCollector;
use crate::state::SessionResources;
use crate::{EngineResult, DEFAULT_PUSH_TIMEOUT};

/// Options for a single [`StreamController::push_with`] call.
#[derive(Debug, Clone, Copy)]
pub struct PushOptions {
    /// Longest time to wait for a free slot in either channel.
    pub timeout: Duration,

    /// Truncate or zero-pad audio to exactly match the video duration.
    pub check_duration: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PUSH_TIMEOUT,
            check_duration: true,
        }
    }
}

/// Feeds application media to an encoder through loopback relays.
///
/// A controller can be started and stopped any number of times; each start
/// creates fresh relays, channels and an encoder process.
pub struct StreamController {
    config: StreamConfig,
    launcher: Arc<dyn EncoderLauncher>,
    state: SessionState,
    session: Option<SessionResources>,
    metrics: MetricsCollector,
}

impl StreamController {
    /// Create a controller that launches ffmpeg.
    pub fn new(config: StreamConfig) -> EngineResult<Self> {
        let launcher = FfmpegLauncher::new(config.encoder_program.clone(), config.show_log);
        Self::with_launcher(config, Arc::new(launcher))
    }

    /// Create a controller with a custom encoder launcher.
    pub fn with_launcher(
        config: StreamConfig,
        launcher: Arc<dyn EncoderLauncher>,
    ) -> EngineResult<Self> {
        config.validate()?;

        if config.has_sync_drift() && !config.disable_warning {
            warn!(
                sample_rate = ?config.sample_rate,
                fps = config.fps,
                "Sample rate is not divisible by fps; video and audio will drift apart \
                 over long sessions. Pick a better matched fps and sample rate, or set \
                 disable_warning and push with check_duration off to pace audio yourself."
            );
        }

        Ok(Self {
            config,
            launcher,
            state: SessionState::Idle,
            session: None,
            metrics: MetricsCollector::new(),
        })
    }

    /// Start streaming. Does nothing if already running.
    #[instrument(name = "stream_start", skip(self))]
    pub fn start(&mut self) -> EngineResult<()> {
        if !self.state.is_idle() {
            debug!("Already running, ignoring start");
            return Ok(());
        }

        info!(
            server_url = %self.config.server_url,
            resolution = %self.config.resolution,
            fps = self.config.fps,
            audio = self.config.audio_enabled,
            "Starting stream"
        );

        let session = SessionResources::start(&self.config, self.launcher.as_ref())?;
        self.session = Some(session);
        self.metrics.start();
        self.transition_to(SessionState::Running);

        info!("Stream started");
        Ok(())
    }

    /// Push media with the default timeout and duration checking.
    pub fn push(&self, video: &MediaArray, audio: Option<&MediaArray>) -> EngineResult<()> {
        self.push_with(video, audio, PushOptions::default())
    }

    /// Push one frame `(h, w, 3)` or a batch `(n, h, w, 3)` of u8 video,
    /// optionally with the 1-D f32 audio covering the same duration.
    ///
    /// Input is validated before anything is enqueued. A
    /// [`EngineError::Backpressure`] may leave earlier payloads of the same
    /// call enqueued; treat it as fatal to the session.
    pub fn push_with(
        &self,
        video: &MediaArray,
        audio: Option<&MediaArray>,
        options: PushOptions,
    ) -> EngineResult<()> {
        let session = match (&self.session, self.state) {
            (Some(session), SessionState::Running) => session,
            _ => return Err(EngineError::NotRunning),
        };

        let frames = video_payloads(video, self.config.resolution)?;

        let chunks = match self.config.audio_sample_rate() {
            Some(sample_rate) => {
                let expected = expected_samples(sample_rate, self.config.fps, frames.len());
                let samples = audio_samples(audio, expected, options.check_duration)?;
                audio_payloads(&samples, frames.len())
            }
            None => Vec::new(),
        };

        let mut chunks = chunks.into_iter();
        for frame in frames {
            self.enqueue(session, MediaKind::Video, frame, options.timeout)?;
            if let Some(chunk) = chunks.next() {
                self.enqueue(session, MediaKind::Audio, chunk, options.timeout)?;
            }
        }

        Ok(())
    }

    fn enqueue(
        &self,
        session: &SessionResources,
        kind: MediaKind,
        payload: Bytes,
        timeout: Duration,
    ) -> EngineResult<()> {
        let channel = session
            .channel(kind)
            .ok_or(EngineError::ChannelClosed(kind))?;
        let len = payload.len();

        match channel.push_timeout(payload, timeout) {
            Ok(()) => {
                self.metrics.record_enqueued(kind, len);
                Ok(())
            }
            Err(ChannelError::Full(timeout)) => {
                self.metrics.record_backpressure();
                warn!(%kind, ?timeout, "Channel full; enqueue timed out");
                Err(EngineError::Backpressure { kind, timeout })
            }
            Err(ChannelError::Disconnected) => Err(EngineError::ChannelClosed(kind)),
        }
    }

    /// Stop streaming and release the session. Does nothing if idle.
    ///
    /// Relays are stopped first, which flushes queued media and closes the
    /// encoder's inputs; then the encoder gets up to the configured stop
    /// timeout to exit. An encoder that outlives it is reported, not killed.
    #[instrument(name = "stream_stop", skip(self))]
    pub fn stop(&mut self) -> StopStatus {
        if self.state.is_idle() {
            debug!("Already idle, ignoring stop");
            return StopStatus::AlreadyIdle;
        }

        info!("Stopping stream");
        self.transition_to(SessionState::Stopping);

        let status = match self.session.take() {
            Some(session) => session.shutdown(self.config.stop_timeout()),
            None => StopStatus::EncoderUnknown,
        };

        self.metrics.stop();
        self.transition_to(SessionState::Idle);

        info!(status = %status.message(), "Stream stopped");
        status
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the controller accepts media.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Get the configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Relay ports of the running session as `(video, audio)`.
    pub fn ports(&self) -> Option<(u16, Option<u16>)> {
        let session = self.session.as_ref()?;
        let video = session.video.port().ok()?;
        let audio = session.audio.as_ref().and_then(|a| a.port().ok());
        Some((video, audio))
    }

    /// State of each relay in the running session.
    ///
    /// A relay reports `Connected` once the encoder has attached to it.
    pub fn relay_states(&self) -> Vec<(MediaKind, RelayState)> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };

        let mut states = vec![(MediaKind::Video, session.video.state())];
        if let Some(audio) = &session.audio {
            states.push((MediaKind::Audio, audio.state()));
        }
        states
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> StreamMetrics {
        let queue_len = |kind: MediaKind| {
            self.session
                .as_ref()
                .and_then(|s| s.channel(kind))
                .map(|c| c.len())
                .unwrap_or(0)
        };
        let bytes_sent = self
            .session
            .as_ref()
            .map(SessionResources::bytes_sent)
            .unwrap_or(0);

        self.metrics.snapshot(
            queue_len(MediaKind::Video),
            queue_len(MediaKind::Audio),
            bytes_sent,
        )
    }

    fn transition_to(&mut self, new_state: SessionState) {
        debug!(
            previous = %self.state.name(),
            current = %new_state.name(),
            "State transition"
        );
        self.state = new_state;
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if !self.state.is_idle() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpStream;
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    use ndarray::{Array1, Array3, Array4};
    use parking_lot::Mutex;

    use rawcast_encoder::{
        EncoderConfig, EncoderError, EncoderExit, EncoderProcess, EncoderResult,
    };
    use rawcast_ipc::Resolution;

    const WIDTH: u32 = 8;
    const HEIGHT: u32 = 4;

    fn config(audio: bool) -> StreamConfig {
        let mut config = if audio {
            StreamConfig::new("rtmp://localhost/live/test", Resolution::new(WIDTH, HEIGHT), 30.0, 44100)
        } else {
            StreamConfig::video_only("rtmp://localhost/live/test", Resolution::new(WIDTH, HEIGHT), 30.0)
        };
        config.max_queue_size = 4;
        config.stop_timeout_secs = 5;
        config
    }

    fn frame(value: u8) -> MediaArray {
        Array3::<u8>::from_elem((HEIGHT as usize, WIDTH as usize, 3), value).into()
    }

    fn batch(n: usize) -> MediaArray {
        Array4::<u8>::zeros((n, HEIGHT as usize, WIDTH as usize, 3)).into()
    }

    fn port_of(source: &str) -> u16 {
        source.rsplit(':').next().unwrap().parse().unwrap()
    }

    /// Launcher whose "encoder" never connects and never exits.
    struct IdleLauncher;

    struct IdleProcess;

    impl EncoderProcess for IdleProcess {
        fn wait_timeout(&mut self, _timeout: Duration) -> EncoderResult<Option<EncoderExit>> {
            Ok(None)
        }

        fn id(&self) -> Option<u32> {
            None
        }
    }

    impl EncoderLauncher for IdleLauncher {
        fn launch(&self, _config: &EncoderConfig) -> EncoderResult<Box<dyn EncoderProcess>> {
            Ok(Box::new(IdleProcess))
        }

        fn name(&self) -> &'static str {
            "idle"
        }
    }

    /// Launcher that always fails to spawn.
    struct FailingLauncher;

    impl EncoderLauncher for FailingLauncher {
        fn launch(&self, _config: &EncoderConfig) -> EncoderResult<Box<dyn EncoderProcess>> {
            Err(EncoderError::InvalidConfig("refusing to launch".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Launcher whose "encoder" connects to every input and records what it
    /// reads until the relays close the connection.
    #[derive(Default)]
    struct CapturingLauncher {
        skip_audio: bool,
        launches: Mutex<Vec<EncoderConfig>>,
        video: Arc<Mutex<Vec<u8>>>,
        audio: Arc<Mutex<Vec<u8>>>,
    }

    struct CapturingProcess {
        readers: Vec<JoinHandle<()>>,
    }

    fn spawn_reader(source: &str, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()> {
        let port = port_of(source);
        thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).unwrap();
            sink.lock().extend_from_slice(&received);
        })
    }

    impl EncoderLauncher for CapturingLauncher {
        fn launch(&self, config: &EncoderConfig) -> EncoderResult<Box<dyn EncoderProcess>> {
            self.launches.lock().push(config.clone());

            let mut readers = vec![spawn_reader(&config.video_source, Arc::clone(&self.video))];
            if let Some(source) = config.audio_source.as_ref().filter(|_| !self.skip_audio) {
                readers.push(spawn_reader(source, Arc::clone(&self.audio)));
            }
            Ok(Box::new(CapturingProcess { readers }))
        }

        fn name(&self) -> &'static str {
            "capturing"
        }
    }

    impl EncoderProcess for CapturingProcess {
        fn wait_timeout(&mut self, timeout: Duration) -> EncoderResult<Option<EncoderExit>> {
            let deadline = Instant::now() + timeout;
            while !self.readers.iter().all(|r| r.is_finished()) {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(10));
            }
            for reader in self.readers.drain(..) {
                reader.join().unwrap();
            }
            Ok(Some(EncoderExit {
                code: Some(0),
                success: true,
            }))
        }

        fn id(&self) -> Option<u32> {
            None
        }
    }

    fn wait_connected(controller: &StreamController, kinds: &[MediaKind]) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let states = controller.relay_states();
            let connected = kinds.iter().all(|kind| {
                states
                    .iter()
                    .any(|(k, state)| k == kind && *state == RelayState::Connected)
            });
            if connected {
                return;
            }
            assert!(Instant::now() < deadline, "encoder never connected: {:?}", states);
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn idle_controller(audio: bool) -> StreamController {
        StreamController::with_launcher(config(audio), Arc::new(IdleLauncher)).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config(true);
        config.sample_rate = None;
        let result = StreamController::with_launcher(config, Arc::new(IdleLauncher));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_push_before_start_fails() {
        let controller = idle_controller(true);
        assert!(matches!(
            controller.push(&frame(0), None),
            Err(EngineError::NotRunning)
        ));
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut controller = idle_controller(true);
        controller.start().unwrap();
        let ports = controller.ports().unwrap();

        controller.start().unwrap();
        assert_eq!(controller.ports(), Some(ports));
        assert!(controller.is_running());

        controller.stop();
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let mut controller = idle_controller(true);
        assert_eq!(controller.stop(), StopStatus::AlreadyIdle);

        controller.start().unwrap();
        assert_ne!(controller.stop(), StopStatus::AlreadyIdle);
        assert_eq!(controller.stop(), StopStatus::AlreadyIdle);
        assert!(controller.state().is_idle());
    }

    #[test]
    fn test_push_after_stop_fails() {
        let mut controller = idle_controller(false);
        controller.start().unwrap();
        controller.stop();
        assert!(matches!(
            controller.push(&frame(0), None),
            Err(EngineError::NotRunning)
        ));
    }

    #[test]
    fn test_stop_reports_encoder_timeout() {
        let mut cfg = config(true);
        cfg.stop_timeout_secs = 0;
        let mut controller = StreamController::with_launcher(cfg, Arc::new(IdleLauncher)).unwrap();
        controller.start().unwrap();

        let start = Instant::now();
        assert_eq!(controller.stop(), StopStatus::EncoderTimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(controller.state().is_idle());
    }

    #[test]
    fn test_restart_uses_fresh_relays() {
        let mut controller = idle_controller(true);
        controller.start().unwrap();
        controller.push(&frame(1), None).unwrap();
        controller.stop();

        controller.start().unwrap();
        let metrics = controller.metrics();
        assert_eq!(metrics.video_queue_len, 0);
        assert_eq!(metrics.frames_pushed, 0);
        controller.stop();
    }

    #[test]
    fn test_failed_launch_rolls_back() {
        let mut controller =
            StreamController::with_launcher(config(true), Arc::new(FailingLauncher)).unwrap();

        assert!(matches!(controller.start(), Err(EngineError::Encoder(_))));
        assert!(controller.state().is_idle());
        assert!(controller.ports().is_none());
        assert_eq!(controller.stop(), StopStatus::AlreadyIdle);
    }

    #[test]
    fn test_single_frame_enqueues_one_video_payload() {
        let mut controller = idle_controller(false);
        controller.start().unwrap();

        controller.push(&frame(9), None).unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.video_queue_len, 1);
        assert_eq!(metrics.frames_pushed, 1);
        assert_eq!(metrics.bytes_enqueued, (WIDTH * HEIGHT * 3) as u64);
        controller.stop();
    }

    #[test]
    fn test_audio_disabled_ignores_audio_argument() {
        let mut controller = idle_controller(false);
        controller.start().unwrap();

        let audio: MediaArray = Array1::<f64>::zeros(10).into();
        controller.push(&batch(3), Some(&audio)).unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.video_queue_len, 3);
        assert_eq!(metrics.audio_queue_len, 0);
        assert_eq!(metrics.audio_chunks_pushed, 0);
        controller.stop();
    }

    #[test]
    fn test_invalid_input_enqueues_nothing() {
        let mut controller = idle_controller(true);
        controller.start().unwrap();

        let wrong_size: MediaArray = Array3::<u8>::zeros((HEIGHT as usize, 3, 3)).into();
        assert!(matches!(
            controller.push(&wrong_size, None),
            Err(EngineError::Shape(_))
        ));

        let wrong_audio: MediaArray = Array1::<f64>::zeros(1470).into();
        assert!(matches!(
            controller.push(&frame(0), Some(&wrong_audio)),
            Err(EngineError::Dtype(_))
        ));

        let metrics = controller.metrics();
        assert_eq!(metrics.video_queue_len, 0);
        assert_eq!(metrics.audio_queue_len, 0);
        controller.stop();
    }

    #[test]
    fn test_backpressure_after_capacity() {
        let mut controller = idle_controller(false);
        controller.start().unwrap();

        let options = PushOptions {
            timeout: Duration::from_millis(100),
            check_duration: true,
        };

        // Capacity is 4 and nothing drains.
        for _ in 0..4 {
            controller.push_with(&frame(0), None, options).unwrap();
        }

        let start = Instant::now();
        let result = controller.push_with(&frame(0), None, options);
        assert!(matches!(
            result,
            Err(EngineError::Backpressure {
                kind: MediaKind::Video,
                ..
            })
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(controller.metrics().backpressure_failures, 1);
        controller.stop();
    }

    #[test]
    fn test_audio_backpressure_keeps_committed_video() {
        let launcher = Arc::new(CapturingLauncher {
            skip_audio: true,
            ..Default::default()
        });
        let mut cfg = config(true);
        cfg.max_queue_size = 1;
        let mut controller = StreamController::with_launcher(cfg, launcher.clone()).unwrap();
        controller.start().unwrap();
        wait_connected(&controller, &[MediaKind::Video]);

        let options = PushOptions {
            timeout: Duration::from_millis(500),
            check_duration: true,
        };
        controller.push_with(&frame(1), None, options).unwrap();

        // Video drains, audio does not: the second frame is committed
        // before its audio chunk times out.
        let result = controller.push_with(&frame(2), None, options);
        assert!(matches!(
            result,
            Err(EngineError::Backpressure {
                kind: MediaKind::Audio,
                ..
            })
        ));

        let metrics = controller.metrics();
        assert_eq!(metrics.frames_pushed, 2);
        assert_eq!(metrics.audio_chunks_pushed, 1);
        assert_eq!(metrics.backpressure_failures, 1);

        controller.stop();
        assert_eq!(launcher.video.lock().len(), 2 * (WIDTH * HEIGHT * 3) as usize);
    }

    #[test]
    fn test_end_to_end_delivery_with_audio() {
        let launcher = Arc::new(CapturingLauncher::default());
        let mut controller =
            StreamController::with_launcher(config(true), launcher.clone()).unwrap();
        controller.start().unwrap();
        wait_connected(&controller, &[MediaKind::Video, MediaKind::Audio]);

        let (video_port, audio_port) = controller.ports().unwrap();
        {
            let launches = launcher.launches.lock();
            assert_eq!(launches.len(), 1);
            assert_eq!(launches[0].video_source, format!("tcp://127.0.0.1:{}", video_port));
            assert_eq!(
                launches[0].audio_source,
                audio_port.map(|p| format!("tcp://127.0.0.1:{}", p))
            );
            assert_eq!(launches[0].sample_rate, Some(44100));
        }

        for i in 0..5u8 {
            controller.push(&frame(i), None).unwrap();
        }
        controller.push(&batch(7), None).unwrap();

        let status = controller.stop();
        assert_eq!(status, StopStatus::EncoderExited { code: Some(0) });

        let frame_len = (WIDTH * HEIGHT * 3) as usize;
        let video = launcher.video.lock();
        assert_eq!(video.len(), 12 * frame_len);
        for i in 0..5 {
            assert!(video[i * frame_len..(i + 1) * frame_len]
                .iter()
                .all(|&b| b == i as u8));
        }

        // Five single frames of 1470 samples plus one batch of 10290.
        let audio = launcher.audio.lock();
        assert_eq!(audio.len(), (5 * 1470 + 10290) * 4);
    }

    #[test]
    fn test_supplied_audio_is_delivered_in_order() {
        let launcher = Arc::new(CapturingLauncher::default());
        let mut controller =
            StreamController::with_launcher(config(true), launcher.clone()).unwrap();
        controller.start().unwrap();
        wait_connected(&controller, &[MediaKind::Video, MediaKind::Audio]);

        // 3 frames at 30 fps and 44.1 kHz expect 4410 samples; give more.
        let samples: Vec<f32> = (0..5000).map(|i| i as f32).collect();
        controller
            .push(&batch(3), Some(&MediaArray::from(samples)))
            .unwrap();
        controller.stop();

        let audio = launcher.audio.lock();
        let decoded: Vec<f32> = audio
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let expected: Vec<f32> = (0..4410).map(|i| i as f32).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_video_only_end_to_end() {
        let launcher = Arc::new(CapturingLauncher::default());
        let mut controller =
            StreamController::with_launcher(config(false), launcher.clone()).unwrap();
        controller.start().unwrap();
        assert_eq!(controller.ports().map(|(_, audio)| audio), Some(None));
        wait_connected(&controller, &[MediaKind::Video]);

        controller.push(&batch(6), None).unwrap();
        controller.stop();

        assert!(launcher.launches.lock()[0].audio_source.is_none());
        assert_eq!(launcher.video.lock().len(), 6 * (WIDTH * HEIGHT * 3) as usize);
        assert!(launcher.audio.lock().is_empty());
    }

    #[test]
    fn test_drop_stops_running_session() {
        let launcher = Arc::new(CapturingLauncher::default());
        {
            let mut controller =
                StreamController::with_launcher(config(false), launcher.clone()).unwrap();
            controller.start().unwrap();
            wait_connected(&controller, &[MediaKind::Video]);
            controller.push(&frame(3), None).unwrap();
        }
        assert_eq!(launcher.video.lock().len(), (WIDTH * HEIGHT * 3) as usize);
    }
}
