//! The session phase state machine.
//!
//! The phase is the single source of truth for the session lifecycle: it
//! decides which commands may be sent and what a user interface may offer.
//! Phases only change by applying a [`PhaseEvent`]; an event that is not
//! defined for the current phase is rejected and leaves the phase untouched.

use std::fmt;

use serde::Serialize;

use crate::error::SessionError;

/// The discrete state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Disconnected,
    Connecting,
    WaitingForDevice,
    EnteringServiceMode,
    InServiceMode,
    Monitoring,
    ExecutingCommand,
    Error,
}

impl Phase {
    /// Commands can only be exchanged with a device in service mode.
    pub fn can_send_commands(self) -> bool {
        matches!(self, Phase::InServiceMode | Phase::ExecutingCommand)
    }

    /// `true` while a transport is open and healthy.
    pub fn is_connected(self) -> bool {
        !matches!(self, Phase::Disconnected | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::WaitingForDevice => "waiting for device",
            Phase::EnteringServiceMode => "entering service mode",
            Phase::InServiceMode => "in service mode",
            Phase::Monitoring => "monitoring",
            Phase::ExecutingCommand => "executing command",
            Phase::Error => "in error state",
        })
    }
}

/// Events triggering phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseEvent {
    /// The transport was opened. `Disconnected => Connecting`.
    PortOpened,
    /// The transport is ready for traffic. `Connecting => WaitingForDevice`.
    TransportReady,
    /// Mode entry was requested. `WaitingForDevice => EnteringServiceMode`.
    EntryRequested,
    /// A beacon or an `ok` answered the mode-entry command.
    /// `EnteringServiceMode => InServiceMode`.
    Acknowledged,
    /// Mode entry was cancelled by the caller.
    /// `EnteringServiceMode => WaitingForDevice`.
    EntryCancelled,
    /// The mode-entry window elapsed without acknowledgment.
    /// `EnteringServiceMode => Error`.
    WindowExpired,
    /// A command was written. `InServiceMode => ExecutingCommand`.
    CommandIssued,
    /// The outstanding command got its response, timed out or was cancelled.
    /// `ExecutingCommand => InServiceMode`.
    CommandResolved,
    /// The device left service mode (exit or reboot acknowledged).
    /// `InServiceMode => WaitingForDevice`.
    ServiceModeLeft,
    /// Monitor-only mode was requested.
    /// `WaitingForDevice | InServiceMode => Monitoring`.
    MonitorRequested,
    /// Monitor-only mode was left; back to the phase it was entered from.
    MonitorExited,
    /// The device reported an unrecoverable error. Any in-session phase
    /// `=> Error`.
    ProtocolFault,
    /// The transport failed. Any phase `=> Error`.
    TransportFailed,
    /// Explicit disconnect. Any phase `=> Disconnected`.
    Disconnect,
}

/// A completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

/// Holds the current phase and applies events to it.
#[derive(Debug, Clone)]
pub(crate) struct PhaseMachine {
    phase: Phase,
    /// Where `MonitorExited` goes back to.
    monitor_return: Phase,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        PhaseMachine {
            phase: Phase::Disconnected,
            monitor_return: Phase::WaitingForDevice,
        }
    }
}

impl PhaseMachine {
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply `event`, returning the transition it caused.
    pub(crate) fn apply(&mut self, event: PhaseEvent) -> Result<Transition, SessionError> {
        use Phase::*;
        use PhaseEvent::*;

        let from = self.phase;
        let to = match (from, event) {
            (Disconnected, PortOpened) => Connecting,
            (Connecting, TransportReady) => WaitingForDevice,
            (WaitingForDevice, EntryRequested) => EnteringServiceMode,
            (EnteringServiceMode, Acknowledged) => InServiceMode,
            (EnteringServiceMode, EntryCancelled) => WaitingForDevice,
            (EnteringServiceMode, WindowExpired) => Error,
            (InServiceMode, CommandIssued) => ExecutingCommand,
            (ExecutingCommand, CommandResolved) => InServiceMode,
            (InServiceMode, ServiceModeLeft) => WaitingForDevice,
            (WaitingForDevice, MonitorRequested) | (InServiceMode, MonitorRequested) => {
                self.monitor_return = from;
                Monitoring
            }
            (Monitoring, MonitorExited) => self.monitor_return,
            (EnteringServiceMode, ProtocolFault)
            | (InServiceMode, ProtocolFault)
            | (ExecutingCommand, ProtocolFault)
            | (Monitoring, ProtocolFault) => Error,
            (_, TransportFailed) => Error,
            (_, Disconnect) => Disconnected,
            (phase, event) => return Err(SessionError::InvalidTransition { phase, event }),
        };
        self.phase = to;
        Ok(Transition { from, to })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_at(events: &[PhaseEvent]) -> PhaseMachine {
        let mut machine = PhaseMachine::default();
        for event in events {
            machine.apply(*event).unwrap();
        }
        machine
    }

    const TO_SERVICE_MODE: [PhaseEvent; 4] = [
        PhaseEvent::PortOpened,
        PhaseEvent::TransportReady,
        PhaseEvent::EntryRequested,
        PhaseEvent::Acknowledged,
    ];

    #[test]
    fn starts_disconnected() {
        assert_eq!(PhaseMachine::default().phase(), Phase::Disconnected);
    }

    #[test]
    fn happy_path() {
        let mut machine = machine_at(&TO_SERVICE_MODE);
        assert_eq!(machine.phase(), Phase::InServiceMode);

        let t = machine.apply(PhaseEvent::CommandIssued).unwrap();
        assert_eq!(t.from, Phase::InServiceMode);
        assert_eq!(t.to, Phase::ExecutingCommand);
        machine.apply(PhaseEvent::CommandResolved).unwrap();
        assert_eq!(machine.phase(), Phase::InServiceMode);
    }

    #[test]
    fn only_service_mode_sends_commands() {
        use Phase::*;
        for phase in [
            Disconnected,
            Connecting,
            WaitingForDevice,
            EnteringServiceMode,
            Monitoring,
            Error,
        ] {
            assert!(!phase.can_send_commands(), "{:?}", phase);
        }
        assert!(InServiceMode.can_send_commands());
        assert!(ExecutingCommand.can_send_commands());
    }

    #[test]
    fn window_expiry_is_an_error() {
        let mut machine = machine_at(&TO_SERVICE_MODE[..3]);
        machine.apply(PhaseEvent::WindowExpired).unwrap();
        assert_eq!(machine.phase(), Phase::Error);
    }

    #[test]
    fn entry_can_be_cancelled() {
        let mut machine = machine_at(&TO_SERVICE_MODE[..3]);
        machine.apply(PhaseEvent::EntryCancelled).unwrap();
        assert_eq!(machine.phase(), Phase::WaitingForDevice);
    }

    #[test]
    fn illegal_events_leave_phase_untouched() {
        let mut machine = machine_at(&TO_SERVICE_MODE[..2]);
        let err = machine.apply(PhaseEvent::CommandIssued).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                phase: Phase::WaitingForDevice,
                event: PhaseEvent::CommandIssued
            }
        ));
        assert_eq!(machine.phase(), Phase::WaitingForDevice);

        let mut machine = PhaseMachine::default();
        assert!(machine.apply(PhaseEvent::EntryRequested).is_err());
        assert!(machine.apply(PhaseEvent::ProtocolFault).is_err());
    }

    #[test]
    fn monitoring_returns_where_it_came_from() {
        let mut machine = machine_at(&TO_SERVICE_MODE[..2]);
        machine.apply(PhaseEvent::MonitorRequested).unwrap();
        assert_eq!(machine.phase(), Phase::Monitoring);
        assert!(machine.apply(PhaseEvent::CommandIssued).is_err());
        machine.apply(PhaseEvent::MonitorExited).unwrap();
        assert_eq!(machine.phase(), Phase::WaitingForDevice);

        let mut machine = machine_at(&TO_SERVICE_MODE);
        machine.apply(PhaseEvent::MonitorRequested).unwrap();
        machine.apply(PhaseEvent::MonitorExited).unwrap();
        assert_eq!(machine.phase(), Phase::InServiceMode);
    }

    #[test]
    fn transport_failure_from_anywhere() {
        for prefix in 0..=TO_SERVICE_MODE.len() {
            let mut machine = machine_at(&TO_SERVICE_MODE[..prefix]);
            machine.apply(PhaseEvent::TransportFailed).unwrap();
            assert_eq!(machine.phase(), Phase::Error);
            machine.apply(PhaseEvent::Disconnect).unwrap();
            assert_eq!(machine.phase(), Phase::Disconnected);
        }
    }

    #[test]
    fn leaving_service_mode() {
        let mut machine = machine_at(&TO_SERVICE_MODE);
        machine.apply(PhaseEvent::ServiceModeLeft).unwrap();
        assert_eq!(machine.phase(), Phase::WaitingForDevice);
    }
}
