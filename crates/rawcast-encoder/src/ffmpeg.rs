//! ffmpeg-backed encoder.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use crate::error::EncoderError;
use crate::{
    EncoderConfig, EncoderExit, EncoderLauncher, EncoderProcess, EncoderResult,
    WAIT_POLL_INTERVAL,
};

/// Build the ffmpeg argument list (without the program name).
pub fn ffmpeg_args(config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-re".into()];

    args.extend([
        "-probesize".into(),
        "16k".into(),
        "-f".into(),
        "rawvideo".into(),
        "-vcodec".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        config.resolution.to_string(),
        "-r".into(),
        config.fps.to_string(),
        "-i".into(),
        config.video_source.clone(),
    ]);

    if let (Some(source), Some(rate)) = (&config.audio_source, config.sample_rate) {
        args.extend([
            "-probesize".into(),
            "16k".into(),
            "-f".into(),
            "f32le".into(),
            "-ar".into(),
            rate.to_string(),
            "-i".into(),
            source.clone(),
        ]);
    }

    args.extend([
        "-g".into(),
        "10".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-c:v".into(),
        "libx264".into(),
        "-c:a".into(),
        "aac".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "veryfast".into(),
        "-f".into(),
        "flv".into(),
        config.output_url.clone(),
    ]);

    args
}

/// Launches ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: String,
    show_log: bool,
}

impl FfmpegLauncher {
    /// Create a launcher for `program` (normally "ffmpeg").
    ///
    /// With `show_log` the command line is logged and ffmpeg's own output is
    /// inherited; otherwise it is discarded.
    pub fn new(program: impl Into<String>, show_log: bool) -> Self {
        Self {
            program: program.into(),
            show_log,
        }
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new(rawcast_ipc::DEFAULT_ENCODER_PROGRAM, true)
    }
}

impl EncoderLauncher for FfmpegLauncher {
    #[instrument(name = "ffmpeg_launch", skip(self, config))]
    fn launch(&self, config: &EncoderConfig) -> EncoderResult<Box<dyn EncoderProcess>> {
        config.validate()?;

        let args = ffmpeg_args(config);

        if self.show_log {
            info!(program = %self.program, ?args, "Launching encoder");
        } else {
            debug!(program = %self.program, ?args, "Launching encoder");
        }

        let (stdout, stderr) = if self.show_log {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| EncoderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        info!(pid = child.id(), "Encoder started");

        Ok(Box::new(FfmpegProcess { child }))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// A running ffmpeg child process.
#[derive(Debug)]
pub struct FfmpegProcess {
    child: Child,
}

impl EncoderProcess for FfmpegProcess {
    fn wait_timeout(&mut self, timeout: Duration) -> EncoderResult<Option<EncoderExit>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = self.child.try_wait().map_err(EncoderError::Wait)? {
                return Ok(Some(EncoderExit {
                    code: status.code(),
                    success: status.success(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp_source;
    use rawcast_ipc::Resolution;

    fn config(audio: bool) -> EncoderConfig {
        EncoderConfig {
            video_source: tcp_source("127.0.0.1", 5000),
            audio_source: audio.then(|| tcp_source("127.0.0.1", 5001)),
            output_url: "rtmp://localhost/live/test".into(),
            resolution: Resolution::new(640, 480),
            fps: 30.0,
            sample_rate: audio.then_some(44100),
        }
    }

    #[test]
    fn test_args_with_audio() {
        let args = ffmpeg_args(&config(true));
        let expected = [
            "-y", "-re",
            "-probesize", "16k", "-f", "rawvideo", "-vcodec", "rawvideo",
            "-pix_fmt", "bgr24", "-s", "640x480", "-r", "30",
            "-i", "tcp://127.0.0.1:5000",
            "-probesize", "16k", "-f", "f32le", "-ar", "44100",
            "-i", "tcp://127.0.0.1:5001",
            "-g", "10", "-tune", "zerolatency", "-c:v", "libx264", "-c:a", "aac",
            "-pix_fmt", "yuv420p", "-preset", "veryfast", "-f", "flv",
            "rtmp://localhost/live/test",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_args_without_audio() {
        let args = ffmpeg_args(&config(false));
        assert!(!args.iter().any(|a| a == "f32le"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert_eq!(args.last().map(String::as_str), Some("rtmp://localhost/live/test"));
    }

    #[test]
    fn test_fractional_fps() {
        let mut config = config(false);
        config.fps = 29.97;
        let args = ffmpeg_args(&config);
        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "29.97");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let launcher = FfmpegLauncher::new("rawcast-definitely-not-installed", false);
        let result = launcher.launch(&config(true));
        assert!(matches!(result, Err(EncoderError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_reports_exit() {
        let launcher = FfmpegLauncher::new("true", false);
        let mut process = launcher.launch(&config(false)).unwrap();
        assert!(process.id().is_some());

        let exit = process.wait_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(
            exit,
            Some(EncoderExit {
                code: Some(0),
                success: true
            })
        );
    }
}
