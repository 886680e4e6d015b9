//! Test orchestration.
//!
//! Tests run one at a time: the device is single-threaded over the same serial
//! line. Only tests listed in the manifest are ever sent.

use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::Value;

use super::correlator::CommandOutcome;
use super::driver::Session;
use super::events::SessionEvent;
use super::phase::Phase;
use super::state::{TestResult, TestRunSummary, TestStatus};
use crate::error::SessionError;
use crate::protocol::{Command, CommandData};
use crate::timeouts::{TEST_ALL_COMMAND, TEST_COMMAND_PREFIX};

impl Session {
    /// Run the test `name`, with optional test data, under its own timeout.
    ///
    /// Rejected before anything is sent when no manifest is known or the
    /// manifest does not list the test.
    pub fn run_test(&mut self, name: &str, data: CommandData) -> Result<TestResult, SessionError> {
        self.run_test_within(name, data, None)
    }

    /// Run every test the device supports, in manifest order.
    ///
    /// Each test gets its own timeout, capped by what is left of the
    /// aggregate run timeout. Tests that no longer fit are recorded as
    /// skipped. A failing or timed out test does not stop the run, but losing
    /// the session does: the results collected so far are returned with the
    /// reason in [`TestRunSummary::aborted`].
    pub fn test_all(&mut self) -> Result<TestRunSummary, SessionError> {
        let tests = self.supported_tests()?;
        self.ensure_ready()?;

        let started = Instant::now();
        let deadline = started + self.settings.timeouts.run_all();
        let mut summary = TestRunSummary::default();
        info!("Running {} tests", tests.len());

        for (index, name) in tests.iter().enumerate() {
            let phase = self.phase();
            if matches!(phase, Phase::Error | Phase::Disconnected) {
                summary.aborted = Some(format!("session {} before test `{}`", phase, name));
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                warn!("Run timeout reached, skipping {} tests", tests.len() - index);
                for skipped in &tests[index..] {
                    let result = TestResult::new(skipped, TestStatus::Skipped)
                        .with_message("run timeout reached");
                    self.record(result.clone());
                    summary.results.push(result);
                }
                break;
            }

            match self.run_test_within(name, CommandData::new(), Some(remaining)) {
                Ok(result) => summary.results.push(result),
                Err(e) => {
                    if let Some(result) = self.state.test_result(name) {
                        summary.results.push(result.clone());
                    }
                    summary.aborted = Some(e.to_string());
                    break;
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            "Tests done in {:?}: {} passed, {} failed, {} skipped",
            summary.elapsed,
            summary.passed(),
            summary.failed(),
            summary.skipped()
        );
        Ok(summary)
    }

    /// Ask the device to run all of its tests on its own (`test_all`), under
    /// the aggregate run timeout. Per-test results reported in
    /// `data.results` are recorded.
    pub fn device_test_all(&mut self) -> Result<CommandOutcome, SessionError> {
        let timeout = self.settings.timeouts.run_all();
        let started = Instant::now();
        let outcome = self.execute(Command::new(TEST_ALL_COMMAND), timeout)?;
        let elapsed = started.elapsed();
        let results = outcome
            .response()
            .and_then(|response| response.data.as_ref())
            .and_then(|data| data.get("results"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for (name, reported) in results {
            let mut result = parse_reported(&name, &reported);
            result.duration = elapsed;
            self.record(result);
        }
        Ok(outcome)
    }

    fn supported_tests(&self) -> Result<Vec<String>, SessionError> {
        self.state
            .manifest
            .as_ref()
            .map(|manifest| manifest.supported_tests.clone())
            .ok_or(SessionError::NoManifest)
    }

    fn run_test_within(
        &mut self,
        name: &str,
        data: CommandData,
        cap: Option<Duration>,
    ) -> Result<TestResult, SessionError> {
        let manifest = self.state.manifest.as_ref().ok_or(SessionError::NoManifest)?;
        if !manifest.supports_test(name) {
            return Err(SessionError::UnsupportedTest(name.to_owned()));
        }
        self.ensure_ready()?;

        let own = self.settings.timeouts.test(name);
        let timeout = cap.map_or(own, |cap| cap.min(own));
        let command = Command::with_data(format!("{}{}", TEST_COMMAND_PREFIX, name), data);
        info!("Running test `{}` (timeout {:?})", name, timeout);
        self.record(TestResult::new(name, TestStatus::Running));

        let started = Instant::now();
        match self.execute(command, timeout) {
            Ok(outcome) => {
                let result = TestResult::from_outcome(name, &outcome, started.elapsed());
                info!("Test `{}`: {:?} ({})", name, result.status, outcome);
                self.record(result.clone());
                Ok(result)
            }
            Err(e) => {
                // A disconnect wiped the state; nothing to record into.
                if self.phase() != Phase::Disconnected {
                    let mut result =
                        TestResult::new(name, TestStatus::Failed).with_message(e.to_string());
                    result.duration = started.elapsed();
                    self.record(result);
                }
                Err(e)
            }
        }
    }

    fn record(&mut self, result: TestResult) {
        self.events.publish(SessionEvent::TestUpdated(result.clone()));
        self.state.record_test(result);
    }
}

/// Read one entry of a `test_all` report: either a bare boolean, a status
/// string, or an object with a `status`/`passed` field and an optional
/// `message`.
fn parse_reported(name: &str, reported: &Value) -> TestResult {
    let status = |raw: &str| match raw {
        "ok" | "pass" | "passed" => TestStatus::Passed,
        "skip" | "skipped" => TestStatus::Skipped,
        _ => TestStatus::Failed,
    };
    let mut result = match reported {
        Value::Bool(true) => TestResult::new(name, TestStatus::Passed),
        Value::Bool(false) => TestResult::new(name, TestStatus::Failed),
        Value::String(raw) => TestResult::new(name, status(raw)),
        Value::Object(fields) => {
            let from_status = fields.get("status").and_then(Value::as_str).map(status);
            let from_flag = fields.get("passed").and_then(Value::as_bool).map(|passed| {
                if passed {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                }
            });
            let mut result = TestResult::new(
                name,
                from_status.or(from_flag).unwrap_or(TestStatus::Failed),
            );
            result.message = fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned);
            result.data = Some(reported.clone());
            result
        }
        _ => TestResult::new(name, TestStatus::Failed),
    };
    if result.message.is_none() && result.status == TestStatus::Failed {
        result.message = Some("reported as failed by the device".into());
    }
    result
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reported_shapes() {
        assert_eq!(parse_reported("wifi", &json!(true)).status, TestStatus::Passed);
        assert_eq!(parse_reported("wifi", &json!(false)).status, TestStatus::Failed);
        assert_eq!(parse_reported("wifi", &json!("skipped")).status, TestStatus::Skipped);

        let result = parse_reported(
            "cloud",
            &json!({"status": "failed", "message": "request_failed"}),
        );
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.message.as_deref(), Some("request_failed"));

        let result = parse_reported("rfid", &json!({"passed": true}));
        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.data.is_some());

        let result = parse_reported("audio", &json!(42));
        assert_eq!(result.status, TestStatus::Failed);
        assert!(result.message.is_some());
    }
}
