//! Serial port transport.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use std::{cmp, fmt, thread};

use hexplay::HexViewBuilder;
use log::{log_enabled, trace, warn, Level::Trace};
use serialport::{ClearBuffer, SerialPort};

use super::{Connector, Transport};
use crate::error::TransportError;
use crate::settings::Settings;
use crate::utils::open_and_setup_port;

/// How long to sleep between two polls of an idle port.
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Maximum number of bytes read from the port at once.
const READ_CHUNK: u32 = 4096;
/// A line growing beyond this without a terminator is cut.
const MAX_LINE: usize = 64 * 1024;

/// A [`Transport`] over an open, configured serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    buffer: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialTransport {
            name: port.name().unwrap_or_else(|| "serial".into()),
            port,
            buffer: Vec::new(),
        }
    }

    /// Split the first complete line off the receive buffer.
    fn take_line(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|b| *b == b'\n') {
            Some(end) => end,
            None if self.buffer.len() >= MAX_LINE => {
                warn!("{}: {} bytes without a line break", self.name, self.buffer.len());
                self.buffer.len()
            }
            None => return None,
        };
        let taken = cmp::min(end + 1, self.buffer.len());
        let mut line: Vec<u8> = self.buffer.drain(..taken).collect();
        while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Move whatever the port has into the receive buffer, without blocking.
    fn fill(&mut self) -> Result<usize, TransportError> {
        // Only read what is reported as available so that `read` returns
        // immediately.
        let available = self.port.bytes_to_read()?;
        if available == 0 {
            return Ok(0);
        }
        let mut chunk = vec![0; cmp::min(available, READ_CHUNK) as usize];
        let read = match self.port.read(chunk.as_mut_slice()) {
            Ok(read) => read,
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        trace!("{} bytes received", read);
        if log_enabled!(Trace) && read > 0 {
            let view = HexViewBuilder::new(&chunk[..read])
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("\n{}", view);
        }
        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(read)
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&mut self) -> Result<(), TransportError> {
        // Boot output received before the session started is of no interest.
        self.port.clear(ClearBuffer::Input)?;
        self.buffer.clear();
        Ok(())
    }

    fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.fill()? > 0 {
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(cmp::min(POLL_INTERVAL, deadline - now));
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.buffer.clear();
        self.port.flush()?;
        Ok(())
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate())
            .field("data_bits", &self.port.data_bits())
            .field("stop_bits", &self.port.stop_bits())
            .field("parity", &self.port.parity())
            .field("flow_control", &self.port.flow_control())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Opens [`SerialTransport`]s with the serial line parameters of the session
/// [`Settings`], retrying for a few seconds while the port is not there yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(
        &mut self,
        settings: &Settings,
        port: &str,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let serial = open_and_setup_port(settings, port).map_err(|source| {
            TransportError::Open {
                port: port.to_owned(),
                source,
            }
        })?;
        Ok(Box::new(SerialTransport::new(serial)))
    }
}
