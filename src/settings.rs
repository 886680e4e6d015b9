//! Settings related to the serial link and to the service-mode session.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::timeouts::TimeoutPolicy;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings related to the serial port and the service-mode session
/// and acts as a [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Per-operation timeouts and the mode-entry retry cadence.
    pub timeouts: TimeoutPolicy,
    /// Maximum number of lines kept in the session log buffer. The oldest
    /// lines are evicted first.
    pub log_capacity: usize,
    /// When `true`, the session log buffer survives a disconnect.
    pub preserve_log: bool,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                timeouts: TimeoutPolicy::default(),
                log_capacity: 1_000,
                preserve_log: true,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Replace the whole timeout table
    pub fn timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.settings.timeouts = timeouts;
        self
    }

    /// Set how many lines the session log buffer keeps
    pub fn log_capacity(mut self, log_capacity: usize) -> Self {
        self.settings.log_capacity = log_capacity.max(1);
        self
    }

    /// Keep (or drop) the session log buffer on disconnect
    pub fn preserve_log(mut self, preserve_log: bool) -> Self {
        self.settings.preserve_log = preserve_log;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeouts: TimeoutPolicy::default(),
            log_capacity: 1_000,
            preserve_log: true,
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn framing() {
    let settings = SettingsBuilder::new()
        .baud_rate(9_600)
        .data_bits(DataBits::Seven)
        .flow_control(FlowControl::Hardware)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .finalize();
    assert_eq!(settings.baud_rate, 9_600);
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.flow_control, FlowControl::Hardware);
    assert_eq!(settings.parity, Parity::Even);
    assert_eq!(settings.stop_bits, StopBits::Two);
}

#[test]
fn log_capacity_is_never_zero() {
    let settings = SettingsBuilder::new().log_capacity(0).finalize();
    assert_eq!(settings.log_capacity, 1);
}

#[test]
fn timeouts() {
    use std::time::Duration;

    let policy = TimeoutPolicy::default().with_command(Duration::from_millis(50));
    let settings = SettingsBuilder::new()
        .timeouts(policy.clone())
        .preserve_log(false)
        .finalize();
    assert_eq!(settings.timeouts, policy);
    assert!(!settings.preserve_log);
}
