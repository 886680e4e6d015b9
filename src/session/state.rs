//! The aggregate session state observed by callers.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::{Map, Value};

use super::correlator::CommandOutcome;
use super::phase::{Phase, PhaseMachine};
use crate::manifest::Manifest;

// DeviceInfo ==================================================================

/// What the session knows about the connected device, gathered from beacons
/// and `get_status` responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_type: Option<String>,
    pub device_name: Option<String>,
    pub firmware_version: Option<String>,
    pub unit_id: Option<String>,
    pub mac: Option<String>,
    /// Every other field reported by the device, verbatim.
    pub extra: Map<String, Value>,
}

impl DeviceInfo {
    /// Merge the fields of a `data` object. Later values override earlier
    /// ones; anything that is not an object is ignored.
    pub(crate) fn merge(&mut self, data: &Value) {
        let object = match data.as_object() {
            Some(object) => object,
            None => return,
        };
        for (key, value) in object {
            let slot = match key.as_str() {
                "device_type" => &mut self.device_type,
                "device_name" => &mut self.device_name,
                "firmware_version" | "firmware" => &mut self.firmware_version,
                "unit_id" => &mut self.unit_id,
                "mac" | "mac_address" => &mut self.mac,
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                    continue;
                }
            };
            match value {
                Value::String(s) => *slot = Some(s.clone()),
                Value::Null => {}
                other => {
                    self.extra.insert(key.clone(), other.clone());
                }
            }
        }
    }
}

// TestResult ==================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    /// Passed, failed and skipped tests are done.
    pub fn is_terminal(self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped)
    }
}

/// The latest outcome of one named test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub message: Option<String>,
    pub data: Option<Value>,
    /// `true` when the device never answered.
    pub timed_out: bool,
    pub timestamp: SystemTime,
    pub duration: Duration,
}

impl TestResult {
    pub(crate) fn new(name: &str, status: TestStatus) -> Self {
        TestResult {
            name: name.to_owned(),
            status,
            message: None,
            data: None,
            timed_out: false,
            timestamp: SystemTime::now(),
            duration: Duration::default(),
        }
    }

    pub(crate) fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn from_outcome(name: &str, outcome: &CommandOutcome, duration: Duration) -> Self {
        let status = if outcome.is_success() {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        let mut result = TestResult::new(name, status);
        result.message = Some(outcome.describe());
        result.data = outcome.response().and_then(|response| response.data.clone());
        result.timed_out = outcome.is_timeout();
        result.duration = duration;
        result
    }
}

/// The aggregated outcome of a multi-test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestRunSummary {
    /// Results in run order, including tests skipped for lack of time.
    pub results: Vec<TestResult>,
    /// Why the run stopped early, if it did.
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

impl TestRunSummary {
    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    pub fn all_passed(&self) -> bool {
        self.aborted.is_none() && self.results.iter().all(|r| r.status == TestStatus::Passed)
    }
}

// Log buffer ==================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Written to the device.
    Host,
    /// A protocol line from the device.
    Device,
    /// A non-protocol line from the device.
    Noise,
    /// A note from the session itself.
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub at: SystemTime,
    pub source: LogSource,
    pub text: String,
}

// SessionState ================================================================

/// The aggregate state of a session.
///
/// Only the [`Session`](crate::Session) mutates it. It is created empty in the
/// `Disconnected` phase and reset on disconnect, optionally keeping the log.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) machine: PhaseMachine,
    pub port: Option<String>,
    pub manifest: Option<Manifest>,
    pub device_info: Option<DeviceInfo>,
    pub test_results: BTreeMap<String, TestResult>,
    pub log: VecDeque<LogLine>,
    pub last_error: Option<String>,
    pub last_beacon: Option<SystemTime>,
    log_capacity: usize,
}

impl SessionState {
    pub(crate) fn new(log_capacity: usize) -> Self {
        SessionState {
            machine: PhaseMachine::default(),
            port: None,
            manifest: None,
            device_info: None,
            test_results: BTreeMap::new(),
            log: VecDeque::new(),
            last_error: None,
            last_beacon: None,
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// The latest result of test `name`.
    pub fn test_result(&self, name: &str) -> Option<&TestResult> {
        self.test_results.get(name)
    }

    pub(crate) fn push_log<S: Into<String>>(&mut self, source: LogSource, text: S) {
        if self.log.len() == self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            at: SystemTime::now(),
            source,
            text: text.into(),
        });
    }

    pub(crate) fn record_test(&mut self, result: TestResult) {
        self.test_results.insert(result.name.clone(), result);
    }

    pub(crate) fn device_info_mut(&mut self) -> &mut DeviceInfo {
        self.device_info.get_or_insert_with(DeviceInfo::default)
    }

    /// Back to a fresh `Disconnected` state.
    pub(crate) fn reset(&mut self, preserve_log: bool) {
        let log = if preserve_log {
            std::mem::take(&mut self.log)
        } else {
            VecDeque::new()
        };
        *self = SessionState {
            log,
            ..SessionState::new(self.log_capacity)
        };
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
