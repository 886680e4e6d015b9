//! Timeout table for the service-mode protocol.
//!
//! The device accepts the `enter_service_mode` command only during a fixed
//! window after boot, so the mode-entry command is repeated at a short interval
//! until acknowledged. Every other operation waits for a single response with
//! a timeout that depends on what the device has to do: most commands answer
//! immediately, but some hardware tests (joining a Wi-Fi network, waiting for
//! an operator to press a button) take a lot longer.

use std::collections::BTreeMap;
use std::time::Duration;

/// Prefix of the wire command running a single named test.
pub(crate) const TEST_COMMAND_PREFIX: &str = "test_";
/// Wire command asking the device to run every test on its own.
pub(crate) const TEST_ALL_COMMAND: &str = "test_all";

/// Per-operation timeouts and the mode-entry retry cadence.
///
/// The defaults follow the device firmware. Individual values can be replaced
/// with the `with_*` methods, which is mostly useful to run a session against
/// a simulated device without waiting for real-world durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    mode_entry_window: Duration,
    mode_entry_retry: Duration,
    command: Duration,
    beacon_poll: Duration,
    run_all: Duration,
    tests: BTreeMap<String, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        let tests = [("wifi", 45), ("cloud", 15), ("rfid", 10), ("button", 30)]
            .iter()
            .map(|(name, secs)| (name.to_string(), Duration::from_secs(*secs)))
            .collect();
        TimeoutPolicy {
            mode_entry_window: Duration::from_secs(10),
            mode_entry_retry: Duration::from_millis(200),
            command: Duration::from_secs(10),
            beacon_poll: Duration::from_secs(5),
            run_all: Duration::from_secs(90),
            tests,
        }
    }
}

impl TimeoutPolicy {
    /// How long after boot the device accepts the mode-entry command.
    pub fn mode_entry_window(&self) -> Duration {
        self.mode_entry_window
    }

    /// Delay between two consecutive mode-entry commands.
    pub fn mode_entry_retry(&self) -> Duration {
        self.mode_entry_retry
    }

    /// Standard timeout for a command response.
    pub fn command(&self) -> Duration {
        self.command
    }

    /// How long to wait for a beacon before giving up a poll.
    pub fn beacon_poll(&self) -> Duration {
        self.beacon_poll
    }

    /// Aggregate timeout for a complete test run.
    pub fn run_all(&self) -> Duration {
        self.run_all
    }

    /// Timeout for the test named `name`, falling back to the standard command
    /// timeout for tests without a dedicated entry.
    pub fn test(&self, name: &str) -> Duration {
        self.tests.get(name).copied().unwrap_or(self.command)
    }

    /// Timeout for the wire command `cmd`.
    ///
    /// `test_all` uses the aggregate run timeout and `test_<name>` uses the
    /// timeout of the named test. Everything else gets the standard command
    /// timeout.
    pub fn for_command(&self, cmd: &str) -> Duration {
        if cmd == TEST_ALL_COMMAND {
            return self.run_all;
        }
        match cmd.strip_prefix(TEST_COMMAND_PREFIX) {
            Some(test) => self.test(test),
            None => self.command,
        }
    }

    pub fn with_mode_entry_window(mut self, window: Duration) -> Self {
        self.mode_entry_window = window;
        self
    }

    pub fn with_mode_entry_retry(mut self, interval: Duration) -> Self {
        self.mode_entry_retry = interval;
        self
    }

    pub fn with_command(mut self, timeout: Duration) -> Self {
        self.command = timeout;
        self
    }

    pub fn with_beacon_poll(mut self, timeout: Duration) -> Self {
        self.beacon_poll = timeout;
        self
    }

    pub fn with_run_all(mut self, timeout: Duration) -> Self {
        self.run_all = timeout;
        self
    }

    /// Set (or add) the timeout of a named test.
    pub fn with_test<S: Into<String>>(mut self, name: S, timeout: Duration) -> Self {
        self.tests.insert(name.into(), timeout);
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_firmware() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.mode_entry_window(), Duration::from_secs(10));
        assert_eq!(policy.mode_entry_retry(), Duration::from_millis(200));
        assert_eq!(policy.command(), Duration::from_secs(10));
        assert_eq!(policy.beacon_poll(), Duration::from_secs(5));
        assert_eq!(policy.run_all(), Duration::from_secs(90));
        assert_eq!(policy.test("wifi"), Duration::from_secs(45));
        assert_eq!(policy.test("cloud"), Duration::from_secs(15));
        assert_eq!(policy.test("rfid"), Duration::from_secs(10));
        assert_eq!(policy.test("button"), Duration::from_secs(30));
    }

    #[test]
    fn unlisted_test_uses_command_timeout() {
        let policy = TimeoutPolicy::default().with_command(Duration::from_secs(3));
        assert_eq!(policy.test("audio"), Duration::from_secs(3));
    }

    #[test]
    fn command_lookup() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.for_command("test_wifi"), Duration::from_secs(45));
        assert_eq!(policy.for_command("test_all"), Duration::from_secs(90));
        assert_eq!(policy.for_command("test_display"), Duration::from_secs(10));
        assert_eq!(policy.for_command("get_status"), Duration::from_secs(10));
    }

    #[test]
    fn overrides() {
        let policy = TimeoutPolicy::default()
            .with_test("wifi", Duration::from_millis(30))
            .with_test("audio", Duration::from_millis(40));
        assert_eq!(policy.for_command("test_wifi"), Duration::from_millis(30));
        assert_eq!(policy.for_command("test_audio"), Duration::from_millis(40));
    }
}
