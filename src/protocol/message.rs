//! Decoded device output.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;

/// The `status` field of a device message.
///
/// Status strings not known to this crate decode as [`Status::Unknown`], with
/// the raw string kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
    ServiceMode,
    Provisioned,
    Failed,
    Unknown(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::ServiceMode => "service_mode",
            Status::Provisioned => "provisioned",
            Status::Failed => "failed",
            Status::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for Status {
    fn from(raw: &str) -> Self {
        match raw {
            "ok" => Status::Ok,
            "error" => Status::Error,
            "service_mode" => Status::ServiceMode,
            "provisioned" => Status::Provisioned,
            "failed" => Status::Failed,
            other => Status::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded unit of device output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub status: Status,
    pub message: Option<String>,
    pub data: Option<Value>,
    /// When the line carrying this message was decoded.
    pub received_at: SystemTime,
}

impl Message {
    pub fn new(status: Status) -> Self {
        Message {
            status,
            message: None,
            data: None,
            received_at: SystemTime::now(),
        }
    }

    /// An unsolicited `service_mode` beacon.
    pub fn is_beacon(&self) -> bool {
        self.status == Status::ServiceMode
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Ok | Status::Provisioned)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, Status::Error | Status::Failed)
    }

    /// A string field of the `data` object, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }

    /// The error code reported by the device.
    ///
    /// Firmware revisions disagree on where the code goes: `data.error_code`
    /// is preferred, then `data.code`, then the `message` text itself.
    pub fn error_code(&self) -> Option<&str> {
        if !self.is_error() {
            return None;
        }
        self.data_str("error_code")
            .or_else(|| self.data_str("code"))
            .or(self.message.as_deref())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.status)?;
        if let Some(message) = &self.message {
            write!(f, " {}", message)?;
        }
        if let Some(data) = &self.data {
            write!(f, " {}", data)?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_flags() {
        assert!(Message::new(Status::ServiceMode).is_beacon());
        assert!(Message::new(Status::Ok).is_success());
        assert!(Message::new(Status::Provisioned).is_success());
        assert!(Message::new(Status::Error).is_error());
        assert!(Message::new(Status::Failed).is_error());

        let unknown = Message::new(Status::from("rebooting"));
        assert!(!unknown.is_beacon());
        assert!(!unknown.is_success());
        assert!(!unknown.is_error());
        assert_eq!(unknown.status.as_str(), "rebooting");
    }

    #[test]
    fn error_code_lookup_order() {
        let mut message = Message::new(Status::Error);
        message.message = Some("Could not connect".into());
        message.data = Some(json!({"error_code": "wifi_connect_failed", "code": "x"}));
        assert_eq!(message.error_code(), Some("wifi_connect_failed"));

        message.data = Some(json!({"code": "wifi_timeout"}));
        assert_eq!(message.error_code(), Some("wifi_timeout"));

        message.data = None;
        message.message = Some("no_network".into());
        assert_eq!(message.error_code(), Some("no_network"));
    }

    #[test]
    fn no_error_code_on_success() {
        let mut message = Message::new(Status::Ok);
        message.message = Some("done".into());
        assert_eq!(message.error_code(), None);
    }
}
