//! The byte transport between the session and a device.
//!
//! The session never touches a serial port directly. It talks to a
//! [`Transport`] obtained from a [`Connector`], which keeps the protocol engine
//! independent of the physical link and lets tests drive it with a scripted
//! device.

mod serial;

use std::time::Duration;

use crate::error::TransportError;
use crate::settings::Settings;

pub use serial::{SerialConnector, SerialTransport};

/// A line-oriented, bidirectional byte stream to one device.
pub trait Transport: Send {
    /// A human readable name for logs, usually the port path.
    fn name(&self) -> String;

    /// Get the link ready for traffic, e.g. by discarding stale input.
    fn prepare(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Write `bytes` as-is. The caller includes the line terminator.
    fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one complete line and return it without its
    /// terminator. `Ok(None)` means nothing complete arrived in time. A zero
    /// timeout only returns what was already received.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens transports on behalf of a [`Session`](crate::Session).
pub trait Connector: Send {
    fn open(
        &mut self,
        settings: &Settings,
        port: &str,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
