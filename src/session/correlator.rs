//! Command/response correlation.
//!
//! The wire protocol carries no request identifiers. The device answers
//! commands strictly in order, so a response belongs to the one outstanding
//! command, whatever it says. The correlator enforces that there is never more
//! than one outstanding command and decides, for each decoded message, whether
//! it resolves that command:
//!
//! * a beacon never does; it is surfaced and the wait goes on,
//! * the first non-beacon message does, as a success or a failure,
//! * when the deadline passes first, the command resolves as timed out.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::SessionError;
use crate::protocol::{DeviceError, Message};

/// How an outstanding command was resolved.
///
/// A device error or a missing answer is an outcome, not an error: the session
/// stays usable either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandOutcome {
    /// The device answered `ok` or `provisioned`.
    Success(Message),
    /// The device answered with anything else.
    Failed {
        response: Message,
        error: Option<DeviceError>,
    },
    /// The device said nothing before the deadline.
    TimedOut { command: String, after: Duration },
}

impl CommandOutcome {
    fn from_response(response: Message) -> Self {
        if response.is_success() {
            CommandOutcome::Success(response)
        } else {
            CommandOutcome::Failed {
                error: DeviceError::from_message(&response),
                response,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandOutcome::TimedOut { .. })
    }

    /// The device response, unless the command timed out.
    pub fn response(&self) -> Option<&Message> {
        match self {
            CommandOutcome::Success(response) | CommandOutcome::Failed { response, .. } => {
                Some(response)
            }
            CommandOutcome::TimedOut { .. } => None,
        }
    }

    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            CommandOutcome::Failed { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// A one-line human description.
    pub fn describe(&self) -> String {
        match self {
            CommandOutcome::Success(response) => response
                .message
                .clone()
                .unwrap_or_else(|| response.status.to_string()),
            CommandOutcome::Failed {
                error: Some(error), ..
            } => error.to_string(),
            CommandOutcome::Failed { response, .. } => {
                format!("device answered `{}`", response.status)
            }
            CommandOutcome::TimedOut { command, after } => {
                format!("`{}` timed out after {:?}", command, after)
            }
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// The one command waiting for its response.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) command: String,
    pub(crate) sent_at: Instant,
    timeout: Duration,
}

impl Pending {
    fn deadline(&self) -> Instant {
        self.sent_at + self.timeout
    }
}

/// What a decoded message means for the outstanding command.
#[derive(Debug)]
pub(crate) enum Classification {
    /// A beacon; the outstanding command (if any) keeps waiting.
    Beacon(Message),
    /// The message resolved the outstanding command.
    Resolved(CommandOutcome),
    /// Nothing was outstanding.
    Unsolicited(Message),
}

#[derive(Debug, Default)]
pub(crate) struct Correlator {
    pending: Option<Pending>,
}

impl Correlator {
    /// Start waiting for the response to `command`. Fails if another command
    /// is still outstanding.
    pub(crate) fn begin(
        &mut self,
        command: &str,
        timeout: Duration,
        now: Instant,
    ) -> Result<(), SessionError> {
        if let Some(pending) = &self.pending {
            return Err(SessionError::CommandPending {
                pending: pending.command.clone(),
            });
        }
        self.pending = Some(Pending {
            command: command.to_owned(),
            sent_at: now,
            timeout,
        });
        Ok(())
    }

    pub(crate) fn pending(&self) -> Option<&Pending> {
        self.pending.as_ref()
    }

    pub(crate) fn classify(&mut self, message: Message) -> Classification {
        if message.is_beacon() {
            return Classification::Beacon(message);
        }
        match self.pending.take() {
            Some(_) => Classification::Resolved(CommandOutcome::from_response(message)),
            None => Classification::Unsolicited(message),
        }
    }

    /// Resolve the outstanding command as timed out if its deadline passed.
    pub(crate) fn expire(&mut self, now: Instant) -> Option<CommandOutcome> {
        let expired = self
            .pending
            .as_ref()
            .map_or(false, |pending| now >= pending.deadline());
        if !expired {
            return None;
        }
        self.pending.take().map(|pending| CommandOutcome::TimedOut {
            command: pending.command,
            after: pending.timeout,
        })
    }

    /// Time left before the outstanding command expires.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|pending| pending.deadline().saturating_duration_since(now))
    }

    /// Drop the outstanding command, returning its name.
    pub(crate) fn cancel(&mut self) -> Option<String> {
        self.pending.take().map(|pending| pending.command)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Status};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn line(raw: &str) -> Message {
        decode(raw).unwrap()
    }

    #[test]
    fn single_outstanding_command() {
        let mut correlator = Correlator::default();
        let now = Instant::now();
        correlator.begin("get_status", TIMEOUT, now).unwrap();
        let err = correlator.begin("reboot", TIMEOUT, now).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandPending { ref pending } if pending == "get_status"
        ));
    }

    #[test]
    fn beacon_does_not_resolve() {
        let mut correlator = Correlator::default();
        correlator.begin("test_wifi", TIMEOUT, Instant::now()).unwrap();

        let beacon = line(r#"{"status":"service_mode","data":{"device_type":"hub"}}"#);
        assert!(matches!(correlator.classify(beacon), Classification::Beacon(_)));
        assert_eq!(correlator.pending().unwrap().command, "test_wifi");

        match correlator.classify(line(r#"{"status":"ok","message":"connected"}"#)) {
            Classification::Resolved(outcome) => {
                assert!(outcome.is_success());
                assert_eq!(outcome.describe(), "connected");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(correlator.pending().is_none());
    }

    #[test]
    fn first_non_beacon_resolves_even_if_unrelated() {
        let mut correlator = Correlator::default();
        correlator.begin("get_status", TIMEOUT, Instant::now()).unwrap();
        match correlator.classify(line(r#"{"status":"provisioned"}"#)) {
            Classification::Resolved(outcome) => assert!(outcome.is_success()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn device_errors_are_classified() {
        let mut correlator = Correlator::default();
        correlator.begin("test_wifi", TIMEOUT, Instant::now()).unwrap();
        match correlator.classify(line(r#"{"status":"failed","message":"wifi_timeout"}"#)) {
            Classification::Resolved(outcome) => {
                assert!(!outcome.is_success());
                assert!(!outcome.is_timeout());
                assert_eq!(outcome.device_error().unwrap().code, "wifi_timeout");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_status_is_a_failure() {
        let mut correlator = Correlator::default();
        correlator.begin("get_status", TIMEOUT, Instant::now()).unwrap();
        match correlator.classify(line(r#"{"status":"busy"}"#)) {
            Classification::Resolved(outcome) => {
                assert!(outcome.device_error().is_none());
                assert_eq!(outcome.describe(), "device answered `busy`");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nothing_outstanding() {
        let mut correlator = Correlator::default();
        assert!(matches!(
            correlator.classify(Message::new(Status::Ok)),
            Classification::Unsolicited(_)
        ));
        assert!(correlator.expire(Instant::now()).is_none());
        assert!(correlator.remaining(Instant::now()).is_none());
    }

    #[test]
    fn timeout() {
        let mut correlator = Correlator::default();
        let sent = Instant::now();
        correlator.begin("test_wifi", Duration::from_secs(45), sent).unwrap();

        assert!(correlator.expire(sent + Duration::from_secs(44)).is_none());
        assert_eq!(
            correlator.remaining(sent + Duration::from_secs(40)),
            Some(Duration::from_secs(5))
        );

        let outcome = correlator.expire(sent + Duration::from_secs(45)).unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::TimedOut {
                command: "test_wifi".into(),
                after: Duration::from_secs(45)
            }
        );
        assert!(correlator.pending().is_none());
    }

    #[test]
    fn cancel() {
        let mut correlator = Correlator::default();
        correlator.begin("reboot", TIMEOUT, Instant::now()).unwrap();
        assert_eq!(correlator.cancel().as_deref(), Some("reboot"));
        assert!(correlator.cancel().is_none());
        correlator.begin("get_status", TIMEOUT, Instant::now()).unwrap();
    }
}
