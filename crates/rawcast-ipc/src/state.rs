//! Session and relay state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle of a streaming controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No relays or encoder exist.
    #[default]
    Idle,

    /// Relays are listening and the encoder is running; `push` is accepted.
    Running,

    /// Teardown is in progress.
    Stopping,
}

impl SessionState {
    /// Returns true if the session is idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session accepts media.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        }
    }
}

/// Lifecycle of a single relay server.
///
/// Transitions only move forward; a stopped relay is never restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// Constructed, not yet bound.
    #[default]
    Created,

    /// Bound and waiting for the encoder to connect.
    Listening,

    /// Encoder connected; payloads are being written.
    Connected,

    /// Stop requested; flushing what is left in the channel.
    Draining,

    /// Relay thread has exited and all sockets are closed.
    Stopped,
}

impl RelayState {
    /// Returns true once the relay has been started, whatever happened since.
    pub fn has_started(&self) -> bool {
        !matches!(self, Self::Created)
    }

    /// Returns true if the relay has terminated.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true if a consumer is attached.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Draining)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Listening => "Listening",
            Self::Connected => "Connected",
            Self::Draining => "Draining",
            Self::Stopped => "Stopped",
        }
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: RelayState) -> bool {
        use RelayState::*;

        matches!(
            (self, next),
            (Created, Listening)
                | (Created, Stopped)
                | (Listening, Connected)
                | (Listening, Stopped)
                | (Connected, Draining)
                | (Connected, Stopped)
                | (Draining, Stopped)
        )
    }
}

/// Outcome of stopping a controller.
///
/// Stopping never fails; an encoder that outlives the wait is reported here
/// instead of as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    /// The controller was not running; nothing was done.
    AlreadyIdle,

    /// The encoder exited within the wait.
    EncoderExited {
        /// Process exit code, if the platform reported one.
        code: Option<i32>,
    },

    /// The encoder was still running when the wait elapsed.
    EncoderTimedOut,

    /// The encoder's exit status could not be determined.
    EncoderUnknown,
}

impl StopStatus {
    /// Returns a display message for this status.
    pub fn message(&self) -> String {
        match self {
            Self::AlreadyIdle => "Stream was not running".to_string(),
            Self::EncoderExited { code: Some(code) } => format!("Encoder exited with code {code}"),
            Self::EncoderExited { code: None } => "Encoder exited".to_string(),
            Self::EncoderTimedOut => "Encoder did not exit before the stop timeout".to_string(),
            Self::EncoderUnknown => "Encoder exit status unknown".to_string(),
        }
    }
}
