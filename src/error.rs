//! Error types.
//!
//! Errors are reserved for transport failures and for calls that are rejected
//! before anything reaches the device. A device answering with an error, or
//! not answering at all, is a normal [`CommandOutcome`](crate::CommandOutcome)
//! and leaves the session usable.

use std::time::Duration;

use thiserror::Error;

use crate::session::{Phase, PhaseEvent};

/// Failures of the serial transport. These are fatal to the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port `{port}`: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("transport is closed")]
    Closed,
}

/// Everything a [`Session`](crate::Session) call can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A command was attempted outside of service mode. Nothing was sent.
    #[error("not ready: commands cannot be sent while {phase}")]
    NotReady { phase: Phase },

    #[error("a session is already active on `{port}`; disconnect it first")]
    AlreadyConnected { port: String },

    #[error("no device is connected")]
    NotConnected,

    #[error("session is in error state ({reason}); disconnect and reconnect the device")]
    Faulted { reason: String },

    /// The protocol has no request identifiers, so a second command cannot be
    /// sent until the first one is resolved.
    #[error("command `{pending}` is still waiting for a response")]
    CommandPending { pending: String },

    #[error("no manifest available; fetch it with `get_manifest` first")]
    NoManifest,

    #[error("test `{0}` is not supported by this device")]
    UnsupportedTest(String),

    #[error("`{field}` requires the `{capability}` capability, which this device lacks")]
    UnsupportedCapability {
        field: String,
        capability: String,
    },

    #[error("command `{0}` is not declared by this device")]
    UnknownCommand(String),

    #[error("command `{command}` requires parameter `{param}`")]
    MissingParameter { command: String, param: String },

    #[error("command `{command}`: invalid parameter `{param}`: {reason}")]
    InvalidParameter {
        command: String,
        param: String,
        reason: String,
    },

    #[error("command `{command}` does not declare parameter `{param}`")]
    UnknownParameter { command: String, param: String },

    #[error("illegal event {event:?} while {phase}")]
    InvalidTransition { phase: Phase, event: PhaseEvent },

    #[error("device did not acknowledge service mode within {window:?}; power-cycle it and retry")]
    WindowExpired { window: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("could not encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[source] serde_json::Error),
}

impl SessionError {
    /// `true` for rejections that happen before anything is written to the
    /// transport.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            SessionError::Transport(_)
                | SessionError::WindowExpired { .. }
                | SessionError::Cancelled
                | SessionError::Manifest(_)
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = SessionError::NotReady {
            phase: Phase::WaitingForDevice,
        };
        assert_eq!(
            err.to_string(),
            "not ready: commands cannot be sent while waiting for device"
        );

        let err = SessionError::UnsupportedTest("button".into());
        assert_eq!(err.to_string(), "test `button` is not supported by this device");
    }

    #[test]
    fn transport_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: SessionError = TransportError::from(io).into();
        assert!(matches!(err, SessionError::Transport(TransportError::Io(_))));
        assert!(!err.is_rejection());
    }

    #[test]
    fn rejections() {
        assert!(SessionError::NoManifest.is_rejection());
        assert!(SessionError::CommandPending {
            pending: "get_status".into()
        }
        .is_rejection());
        assert!(!SessionError::Cancelled.is_rejection());
    }
}
