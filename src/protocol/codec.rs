//! Newline-delimited JSON codec.
//!
//! Splitting the byte stream into lines is the transport's job. The codec
//! works on one complete line at a time and never blocks.

use std::time::SystemTime;

use log::trace;
use serde::{Deserialize, Serialize};

use super::command::{Command, CommandData};
use super::message::{Message, Status};

#[derive(Serialize)]
struct WireCommand<'a> {
    cmd: &'a str,
    // Some firmware revisions treat `"data":{}` differently from a missing
    // field, so an empty map is never written.
    #[serde(skip_serializing_if = "is_empty")]
    data: &'a CommandData,
}

fn is_empty(data: &&CommandData) -> bool {
    data.is_empty()
}

#[derive(Deserialize)]
struct WireMessage {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Encode `command` as a single JSON line, trailing newline included.
pub fn encode(command: &Command) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(&WireCommand {
        cmd: command.name(),
        data: command.data(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one line of device output.
///
/// Returns `None` for anything that is not a JSON object with a string
/// `status` field. Such lines are boot logs or firmware prints sharing the
/// stream and must be ignored rather than treated as errors.
pub fn decode(line: &str) -> Option<Message> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<WireMessage>(line) {
        Ok(wire) => Some(Message {
            status: Status::from(wire.status.as_str()),
            message: wire.message,
            data: wire.data.filter(|data| !data.is_null()),
            received_at: SystemTime::now(),
        }),
        Err(e) => {
            trace!("not a protocol line ({}): {}", e, line);
            None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
