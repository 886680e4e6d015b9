//! Device manifest.
//!
//! In response to `get_manifest`, a device describes itself: what it is, what
//! hardware it carries, which provisioning fields it needs, which tests it can
//! run and which extra commands it understands. The manifest is a snapshot:
//! it is captured once per `get_manifest` exchange and only ever replaced as a
//! whole by a later fetch.
//!
//! [`Manifest::has_capability`] and [`Manifest::supports_test`] are the
//! interrogation points used to decide whether an action is offered at all.
//!
//! **Example**
//! ```
//! use servicemode::{Capability, Manifest};
//! use serde_json::json;
//!
//! let manifest = Manifest::from_value(json!({
//!     "manifest_version": "1.2",
//!     "device_type": "hub",
//!     "capabilities": {"wifi": true, "button": true},
//!     "supported_tests": ["wifi", "button"]
//! }))
//! .unwrap();
//! assert!(manifest.has(Capability::Wifi));
//! assert!(!manifest.has_capability("rfid"));
//! assert!(manifest.supports_test("button"));
//! ```

mod params;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use params::{CommandDefinition, CommandParameter, ParamType};

/// Firmware identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareInfo {
    pub version: String,
    pub build: Option<String>,
    pub git_hash: Option<String>,
}

/// One hardware or service capability a device may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Wifi,
    Bluetooth,
    ThreadDevice,
    ThreadBorderRouter,
    Cloud,
    Rfid,
    Audio,
    Display,
    Battery,
    Button,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::Wifi,
        Capability::Bluetooth,
        Capability::ThreadDevice,
        Capability::ThreadBorderRouter,
        Capability::Cloud,
        Capability::Rfid,
        Capability::Audio,
        Capability::Display,
        Capability::Battery,
        Capability::Button,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Wifi => "wifi",
            Capability::Bluetooth => "bluetooth",
            Capability::ThreadDevice => "thread_device",
            Capability::ThreadBorderRouter => "thread_border_router",
            Capability::Cloud => "cloud",
            Capability::Rfid => "rfid",
            Capability::Audio => "audio",
            Capability::Display => "display",
            Capability::Battery => "battery",
            Capability::Button => "button",
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    /// Accepts both `thread_device` and `thread-device` spellings.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Capability::ALL
            .iter()
            .copied()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| format!("unknown capability `{}`", name))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capability flags of a device. Flags the device leaves out are `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub wifi: bool,
    pub bluetooth: bool,
    #[serde(alias = "thread")]
    pub thread_device: bool,
    pub thread_border_router: bool,
    pub cloud: bool,
    pub rfid: bool,
    pub audio: bool,
    pub display: bool,
    pub battery: bool,
    pub button: bool,
}

impl Capabilities {
    pub fn get(&self, capability: Capability) -> bool {
        match capability {
            Capability::Wifi => self.wifi,
            Capability::Bluetooth => self.bluetooth,
            Capability::ThreadDevice => self.thread_device,
            Capability::ThreadBorderRouter => self.thread_border_router,
            Capability::Cloud => self.cloud,
            Capability::Rfid => self.rfid,
            Capability::Audio => self.audio,
            Capability::Display => self.display,
            Capability::Battery => self.battery,
            Capability::Button => self.button,
        }
    }

    /// The capabilities that are set, in declaration order.
    pub fn enabled(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|capability| self.get(*capability))
            .collect()
    }
}

/// Provisioning field names the device expects in a `provision` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningFields {
    #[serde(alias = "required")]
    pub required_fields: Vec<String>,
    #[serde(alias = "optional")]
    pub optional_fields: Vec<String>,
}

/// An LED pattern hint, telling the operator what the device shows in a given
/// situation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedPattern {
    pub pattern: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

/// Device-reported descriptor of capabilities, tests, provisioning fields and
/// custom commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[serde(alias = "version")]
    pub manifest_version: String,
    pub protocol_version: Option<String>,
    pub device_type: String,
    pub device_name: String,
    pub firmware: FirmwareInfo,
    pub capabilities: Capabilities,
    pub provisioning: ProvisioningFields,
    #[serde(alias = "tests")]
    pub supported_tests: Vec<String>,
    #[serde(alias = "commands")]
    pub custom_commands: Vec<CommandDefinition>,
    pub led_patterns: BTreeMap<String, LedPattern>,
}

impl Manifest {
    /// Parse the `data` of a `get_manifest` response. Both the bare manifest
    /// object and one wrapped in a `manifest` key are accepted.
    pub fn from_value(mut data: Value) -> Result<Self, serde_json::Error> {
        if let Some(inner) = data.get_mut("manifest").filter(|inner| inner.is_object()) {
            let inner = inner.take();
            return serde_json::from_value(inner);
        }
        serde_json::from_value(data)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.get(capability)
    }

    /// `true` when the device declares the capability named `name`. Unknown
    /// names are never supported.
    pub fn has_capability(&self, name: &str) -> bool {
        name.parse::<Capability>()
            .map(|capability| self.has(capability))
            .unwrap_or(false)
    }

    /// `true` when `name` is one of the tests the device can run. Tests not
    /// listed here are never offered.
    pub fn supports_test(&self, name: &str) -> bool {
        self.supported_tests.iter().any(|test| test == name)
    }

    /// The custom command definition named `name`.
    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.custom_commands.iter().find(|def| def.name == name)
    }

    pub fn required_fields(&self) -> &[String] {
        &self.provisioning.required_fields
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
