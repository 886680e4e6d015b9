//! Servicemode provisions and diagnoses embedded IoT devices over a USB serial
//! link during the short window that follows a device boot.
//!
//! A freshly booted device accepts the `enter_service_mode` command only for
//! a few seconds. Once in service mode it speaks a simple line protocol: every
//! outbound command and every inbound message is a single JSON object followed
//! by a newline. Boot logs and firmware prints are interleaved on the same
//! stream and are simply ignored by the protocol engine.
//!
//! The engine is organized around a few pieces:
//!
//! * the [`protocol`] codec turning commands into wire lines and wire lines
//!   into typed [`Message`]s, together with the device error taxonomy,
//! * the [`Manifest`] a device reports about itself, which gates the tests and
//!   custom commands offered to the operator,
//! * the [`TimeoutPolicy`] table,
//! * the [`Session`] façade, which owns the transport and the [`Phase`] state
//!   machine, correlates each command with its response and orchestrates test
//!   runs.
//!
//! Like the rest of this crate, the session lifecycle is a state machine:
//!
//! * It can only be in one [`Phase`] at any time.
//! * Phases only change through explicitly defined transitions triggered by
//!   typed events. Anything else is rejected with an error rather than being
//!   silently ignored.
//! * Commands can only be sent while the device is in service mode, and only
//!   one command can be outstanding at a time because the wire protocol has no
//!   request identifiers.
//!
//! **Example** - Provisioning a device:
//! ```no_run
//! use servicemode::{ProvisionRequest, SerialConnector, Session, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
//! let mut session = Session::new(settings, Box::new(SerialConnector));
//! session.connect("/dev/ttyUSB0")?;
//! session.enter_service_mode()?;
//! session.get_manifest()?;
//! let outcome = session.provision(&ProvisionRequest::new("SV-HUB-000123"))?;
//! println!("provisioned: {}", outcome.is_success());
//! session.disconnect();
//! # Ok::<(), servicemode::SessionError>(())
//! ```

mod error;
mod manifest;
mod session;
mod settings;
mod timeouts;
mod transport;
mod utils;

pub mod protocol;

pub use error::{SessionError, TransportError};
pub use manifest::{
    Capabilities, Capability, CommandDefinition, CommandParameter, FirmwareInfo, LedPattern,
    Manifest, ParamType, ProvisioningFields,
};
pub use protocol::{Command, CommandData, DeviceError, Message, ParamValue, Severity, Status};
pub use session::{
    CommandOutcome, DeviceInfo, LogLine, LogSource, Phase, PhaseEvent, ProvisionRequest, Session,
    SessionEvent, SessionHandle, SessionState, TestResult, TestRunSummary, TestStatus,
};
pub use settings::{Settings, SettingsBuilder};
pub use timeouts::TimeoutPolicy;
pub use transport::{Connector, SerialConnector, SerialTransport, Transport};
pub use utils::{select_port, wait_for_port};
