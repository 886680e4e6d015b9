//! A scripted device standing in for a serial link in tests.
//!
//! The device answers commands according to reply rules. Lines can also be
//! queued directly to simulate beacons, boot noise or late responses.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use servicemode::{
    Connector, Session, Settings, SettingsBuilder, TimeoutPolicy, Transport,
    TransportError,
};

pub const PORT: &str = "/dev/ttyMOCK0";

pub const BEACON: &str =
    r#"{"status":"service_mode","data":{"device_type":"hub","device_name":"Hub Mini","firmware_version":"2.4.1"}}"#;
pub const OK: &str = r#"{"status":"ok"}"#;

pub const MANIFEST: &str = r#"{"status":"ok","data":{
    "manifest_version":"1.2",
    "device_type":"hub",
    "device_name":"Hub Mini",
    "firmware":{"version":"2.4.1"},
    "capabilities":{"wifi":true,"cloud":true,"button":true,"led":true},
    "provisioning":{"required_fields":["unit_id"],"optional_fields":["wifi_ssid","wifi_password"]},
    "supported_tests":["wifi","button"],
    "custom_commands":[{"name":"set_led","params":[
        {"name":"color","type":"string","required":true},
        {"name":"brightness","type":"int","min":0,"max":100}
    ]}]
}}"#;

struct Rule {
    cmd: String,
    skip: usize,
    replies: Vec<String>,
}

#[derive(Default)]
struct DeviceState {
    written: Vec<String>,
    inbox: VecDeque<String>,
    rules: Vec<Rule>,
    fail_reads: bool,
    fail_open: bool,
    closed: usize,
}

/// The device side of a mock serial link. Clones share the same device.
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    /// Queue a line as if the device just printed it.
    pub fn push(&self, line: &str) {
        self.lock().inbox.push_back(compact(line));
    }

    /// Answer every `cmd` with `replies`, in order.
    pub fn on(&self, cmd: &str, replies: &[&str]) {
        self.on_after(cmd, 0, replies);
    }

    /// Ignore the first `skip` occurrences of `cmd`, then answer with
    /// `replies`.
    pub fn on_after(&self, cmd: &str, skip: usize, replies: &[&str]) {
        self.lock().rules.push(Rule {
            cmd: cmd.to_owned(),
            skip,
            replies: replies.iter().map(|reply| compact(reply)).collect(),
        });
    }

    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    pub fn fail_open(&self) {
        self.lock().fail_open = true;
    }

    /// Every line written by the host, without terminators.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// The `cmd` of every line written by the host.
    pub fn commands(&self) -> Vec<String> {
        self.written()
            .iter()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| value["cmd"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn count(&self, cmd: &str) -> usize {
        self.commands().iter().filter(|sent| *sent == cmd).count()
    }

    /// The `data` of the last `cmd` written.
    pub fn last_data(&self, cmd: &str) -> Option<Value> {
        self.written()
            .iter()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|value| value["cmd"] == cmd)
            .last()
            .map(|value| value["data"].clone())
    }

    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MockConnector {
            device: self.clone(),
        })
    }
}

/// Collapse a multi-line JSON literal to a single wire line.
fn compact(line: &str) -> String {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => value.to_string(),
        Err(_) => line.to_owned(),
    }
}

struct MockConnector {
    device: ScriptedDevice,
}

impl Connector for MockConnector {
    fn open(&mut self, _: &Settings, port: &str) -> Result<Box<dyn Transport>, TransportError> {
        if self.device.lock().fail_open {
            return Err(TransportError::Open {
                port: port.to_owned(),
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device"),
            });
        }
        Ok(Box::new(MockTransport {
            device: self.device.clone(),
        }))
    }
}

struct MockTransport {
    device: ScriptedDevice,
}

impl MockTransport {
    fn pop(&self) -> Result<Option<String>, TransportError> {
        let mut state = self.device.lock();
        if state.fail_reads {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        Ok(state.inbox.pop_front())
    }
}

impl Transport for MockTransport {
    fn name(&self) -> String {
        PORT.into()
    }

    fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let line = String::from_utf8_lossy(bytes).trim_end().to_owned();
        let cmd = serde_json::from_str::<Value>(&line)
            .ok()
            .and_then(|value| value["cmd"].as_str().map(str::to_owned));

        let mut state = self.device.lock();
        state.written.push(line);
        let cmd = match cmd {
            Some(cmd) => cmd,
            None => return Ok(()),
        };
        let mut replies = Vec::new();
        if let Some(rule) = state.rules.iter_mut().find(|rule| rule.cmd == cmd) {
            if rule.skip > 0 {
                rule.skip -= 1;
            } else {
                replies = rule.replies.clone();
            }
        }
        state.inbox.extend(replies);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.pop()? {
            return Ok(Some(line));
        }
        if timeout == Duration::ZERO {
            return Ok(None);
        }
        thread::sleep(timeout.min(Duration::from_millis(2)));
        self.pop()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.device.lock().closed += 1;
        Ok(())
    }
}

/// Real-world timeouts shrunk to keep tests fast.
pub fn fast_policy() -> TimeoutPolicy {
    TimeoutPolicy::default()
        .with_mode_entry_window(Duration::from_millis(400))
        .with_mode_entry_retry(Duration::from_millis(20))
        .with_command(Duration::from_millis(300))
        .with_beacon_poll(Duration::from_millis(150))
        .with_run_all(Duration::from_secs(2))
        .with_test("wifi", Duration::from_millis(120))
        .with_test("button", Duration::from_millis(300))
}

pub fn settings() -> Settings {
    SettingsBuilder::new()
        .path(PORT)
        .timeouts(fast_policy())
        .log_capacity(64)
        .finalize()
}

pub fn session(device: &ScriptedDevice) -> Session {
    Session::new(settings(), device.connector())
}

/// A session already in service mode, with the manifest fetched.
pub fn ready_session(device: &ScriptedDevice) -> Session {
    device.on("enter_service_mode", &[BEACON]);
    device.on("get_manifest", &[MANIFEST]);
    let mut session = session(device);
    session.connect(PORT).unwrap();
    session.enter_service_mode().unwrap();
    assert!(session.get_manifest().unwrap().is_success());
    session
}

