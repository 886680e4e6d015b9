//! Device error taxonomy.
//!
//! Devices report failures as short snake_case codes. Known codes get a human
//! description and a classification; unknown codes are passed through
//! verbatim so unexpected firmware strings stay visible.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use super::message::Message;

/// Whether a device error leaves the session usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The command failed but the session stays in service mode.
    Recoverable,
    /// The device can no longer serve this session; reconnect and re-enter
    /// service mode.
    Fatal,
}

struct KnownCode {
    code: &'static str,
    description: &'static str,
    severity: Severity,
}

const fn known(code: &'static str, description: &'static str, severity: Severity) -> KnownCode {
    KnownCode {
        code,
        description,
        severity,
    }
}

use Severity::*;

static KNOWN_CODES: &[KnownCode] = &[
    known("parse_error", "Device could not parse the command", Recoverable),
    known("invalid_command", "Command is malformed", Recoverable),
    known("unknown_command", "Device does not recognise the command", Recoverable),
    known("unsupported_command", "Command is not supported by this device", Recoverable),
    known("missing_data", "Command is missing its data payload", Recoverable),
    known("missing_fields", "Required fields are missing from the command data", Recoverable),
    known("storage_error", "Device failed to write to persistent storage", Recoverable),
    known("wifi_init_failed", "Wi-Fi hardware failed to initialise", Recoverable),
    known("wifi_connect_failed", "Could not connect to the Wi-Fi network", Recoverable),
    known("wifi_timeout", "Timed out connecting to the Wi-Fi network", Recoverable),
    known("no_wifi_config", "No Wi-Fi credentials are configured", Recoverable),
    known("no_network", "No network connection is available", Recoverable),
    known("not_configured", "Device is not configured", Recoverable),
    known("not_provisioned", "Device has not been provisioned", Recoverable),
    known("request_failed", "Cloud request failed", Recoverable),
    known(
        "window_expired",
        "Service mode entry window has expired, power-cycle the device",
        Fatal,
    ),
    known("not_in_service_mode", "Device is not in service mode", Fatal),
    known("rfid_comm_failed", "Could not communicate with the RFID reader", Recoverable),
    known("audio_failed", "Audio playback failed", Recoverable),
    known("button_timeout", "Button was not pressed in time", Recoverable),
];

fn lookup(code: &str) -> Option<&'static KnownCode> {
    KNOWN_CODES.iter().find(|known| known.code == code)
}

/// Human description of `code`, or the code itself when it is not known.
pub fn describe(code: &str) -> Cow<'static, str> {
    match lookup(code) {
        Some(known) => Cow::Borrowed(known.description),
        None => Cow::Owned(code.to_owned()),
    }
}

/// A classified device error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceError {
    pub code: String,
    pub description: String,
    pub severity: Severity,
}

impl DeviceError {
    pub fn from_code(code: &str) -> Self {
        DeviceError {
            code: code.to_owned(),
            description: describe(code).into_owned(),
            severity: lookup(code).map_or(Recoverable, |known| known.severity),
        }
    }

    /// The classified error carried by `message`, if it is an error message
    /// with a code.
    pub fn from_message(message: &Message) -> Option<Self> {
        message.error_code().map(DeviceError::from_code)
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Fatal
    }

    /// `true` when the code is one this crate knows about.
    pub fn is_known(&self) -> bool {
        lookup(&self.code).is_some()
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{} ({})", self.description, self.code)
        } else {
            f.write_str(&self.code)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    #[test]
    fn every_listed_code_is_described() {
        for code in [
            "parse_error",
            "invalid_command",
            "unknown_command",
            "unsupported_command",
            "missing_data",
            "missing_fields",
            "storage_error",
            "wifi_init_failed",
            "wifi_connect_failed",
            "wifi_timeout",
            "no_wifi_config",
            "no_network",
            "not_configured",
            "not_provisioned",
            "request_failed",
            "window_expired",
            "not_in_service_mode",
            "rfid_comm_failed",
            "audio_failed",
            "button_timeout",
        ] {
            assert_ne!(describe(code), code, "{} has no description", code);
        }
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(describe("eeprom_on_fire"), "eeprom_on_fire");
        let error = DeviceError::from_code("eeprom_on_fire");
        assert!(!error.is_known());
        assert_eq!(error.severity, Severity::Recoverable);
        assert_eq!(error.to_string(), "eeprom_on_fire");
    }

    #[test]
    fn classification() {
        assert!(DeviceError::from_code("window_expired").is_fatal());
        assert!(DeviceError::from_code("not_in_service_mode").is_fatal());
        assert!(!DeviceError::from_code("wifi_timeout").is_fatal());
    }

    #[test]
    fn from_message() {
        let mut message = Message::new(Status::Failed);
        message.message = Some("button_timeout".into());
        let error = DeviceError::from_message(&message).unwrap();
        assert_eq!(error.code, "button_timeout");
        assert_eq!(
            error.to_string(),
            "Button was not pressed in time (button_timeout)"
        );

        assert!(DeviceError::from_message(&Message::new(Status::Ok)).is_none());
    }
}
