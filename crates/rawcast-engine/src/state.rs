//! Session resource startup, rollback and teardown.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use rawcast_encoder::{tcp_source, EncoderConfig, EncoderLauncher, EncoderProcess};
use rawcast_ipc::{MediaKind, StopStatus, StreamConfig};
use rawcast_relay::{BoundedChannel, RelayServer};

use crate::EngineResult;

/// Startup phases for a session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartupPhase {
    /// Binding the video relay.
    StartVideoRelay,

    /// Binding the audio relay.
    StartAudioRelay,

    /// Spawning the encoder.
    LaunchEncoder,
}

/// Everything one running session owns.
pub(crate) struct SessionResources {
    pub video: RelayServer,
    pub audio: Option<RelayServer>,
    encoder: Option<Box<dyn EncoderProcess>>,
}

impl SessionResources {
    /// Bring up relays and the encoder. On failure everything started so far
    /// is stopped before the error is returned.
    #[instrument(name = "init_session", skip_all)]
    pub fn start(config: &StreamConfig, launcher: &dyn EncoderLauncher) -> EngineResult<Self> {
        let mut resources = Self {
            video: new_relay(config, MediaKind::Video, config.video_port),
            audio: None,
            encoder: None,
        };

        if let Err(e) = resources.init(config, launcher) {
            warn!("Session start failed: {}", e);
            resources.rollback();
            return Err(e);
        }

        Ok(resources)
    }

    fn init(&mut self, config: &StreamConfig, launcher: &dyn EncoderLauncher) -> EngineResult<()> {
        debug!(phase = ?StartupPhase::StartVideoRelay, "Initializing phase");
        self.video.start()?;
        let video_source = tcp_source(&config.relay_host, self.video.port()?);

        let audio_source = if config.audio_enabled {
            debug!(phase = ?StartupPhase::StartAudioRelay, "Initializing phase");
            let mut audio = new_relay(config, MediaKind::Audio, config.audio_port);
            let started = audio.start();
            // Keep the relay even on failure so rollback stops it.
            let port = started.and_then(|()| audio.port());
            self.audio = Some(audio);
            Some(tcp_source(&config.relay_host, port?))
        } else {
            None
        };

        debug!(phase = ?StartupPhase::LaunchEncoder, launcher = launcher.name(), "Initializing phase");
        let encoder_config = EncoderConfig::for_stream(config, video_source, audio_source);
        self.encoder = Some(launcher.launch(&encoder_config)?);

        Ok(())
    }

    /// Stop whatever relays were started.
    fn rollback(&mut self) {
        info!("Rolling back session resources");
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        self.video.stop();
    }

    /// Channel carrying `kind`, if the session has one.
    pub fn channel(&self, kind: MediaKind) -> Option<&BoundedChannel> {
        match kind {
            MediaKind::Video => Some(self.video.channel()),
            MediaKind::Audio => self.audio.as_ref().map(RelayServer::channel),
        }
    }

    /// Bytes written to the encoder so far across both relays.
    pub fn bytes_sent(&self) -> u64 {
        let audio = self
            .audio
            .as_ref()
            .map(|a| a.statistics().bytes_sent)
            .unwrap_or(0);
        self.video.statistics().bytes_sent + audio
    }

    /// Stop the relays, then wait up to `timeout` for the encoder to exit.
    #[instrument(name = "shutdown_session", skip(self))]
    pub fn shutdown(mut self, timeout: Duration) -> StopStatus {
        self.video.stop();
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }

        let Some(mut encoder) = self.encoder.take() else {
            return StopStatus::EncoderUnknown;
        };

        match encoder.wait_timeout(timeout) {
            Ok(Some(exit)) => {
                info!(code = ?exit.code, success = exit.success, "Encoder exited");
                StopStatus::EncoderExited { code: exit.code }
            }
            Ok(None) => {
                warn!(pid = ?encoder.id(), ?timeout, "Encoder still running after stop timeout");
                StopStatus::EncoderTimedOut
            }
            Err(e) => {
                warn!("Failed to wait for encoder: {}", e);
                StopStatus::EncoderUnknown
            }
        }
    }
}

fn new_relay(config: &StreamConfig, kind: MediaKind, port: u16) -> RelayServer {
    RelayServer::new(
        BoundedChannel::new(config.max_queue_size),
        config.relay_host.clone(),
        port,
    )
    .with_name(kind.thread_name())
}
