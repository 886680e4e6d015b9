//! Serial port discovery and setup.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serialport::{available_ports, SerialPort, SerialPortType};

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use crate::utils::keyboard::{poll_escape, KeyPress};
use crate::Settings;

/// Number of attempts made to open a port before giving up.
const OPEN_ATTEMPTS: usize = 4;

//==============================================================================
// Public Interface
//==============================================================================

/// Wait for at least one USB serial controller to show up, then let the
/// operator pick one.
///
/// Returns `None` when the operator cancels the selection; the caller usually
/// asks again, which refreshes the list of connected controllers.
pub fn select_port() -> Option<String> {
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    let _ = Term::stdout().hide_cursor();
    loop {
        found_ports = enumerate_usb_serial_ports();
        let num_ports = found_ports.len();
        if num_ports > 0 {
            pb.finish_with_message("Select the device to service:");
            break;
        }
        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s {}] ⌛ Waiting for a device to be plugged in...",
            style(waited).dim(),
            num_ports
        ));
        attempt += 1;

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    let _ = Term::stdout().show_cursor();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    selection
}

/// Wait until a port whose name starts with `path` is present, checking every
/// couple of seconds. The operator can give up by pressing `ESC` or Ctrl+C.
///
/// Returns `true` when the wait was cancelled.
pub fn wait_for_port(path: &str) -> bool {
    if check_requested_port(&enumerate_usb_serial_ports(), path) {
        return false;
    }

    let pb = spinner();
    let mut attempt: usize = 1;
    let waiting_period = 2;

    pb.set_message(format!(
        "⏳ Waiting for {} to be plugged in (ESC to cancel)...",
        style(path).cyan()
    ));

    // The keyboard is watched on its own thread. It reports a cancellation on
    // `cancel_tx` and stops as soon as `done_tx` is dropped.
    let (cancel_tx, cancel_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let cancellation_thread = thread::spawn(move || loop {
        if !matches!(done_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            break;
        }
        match poll_escape(Duration::from_millis(500)) {
            Ok(Some(KeyPress::Escape)) | Ok(Some(KeyPress::Interrupt)) => {
                let _ = cancel_tx.send(());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("keyboard polling stopped: {}", e);
                break;
            }
        }
    });

    let mut cancelled = false;
    loop {
        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            break;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be plugged in (ESC to cancel)...",
            style(waited).dim(),
            found_ports.len(),
            style(path).cyan()
        ));

        match cancel_rx.recv_timeout(Duration::from_secs(waiting_period as u64)) {
            Ok(_) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                cancelled = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody watches the keyboard anymore; keep waiting.
            }
        }

        attempt += 1;
    }

    drop(done_tx);
    if cancellation_thread.join().is_err() {
        warn!("keyboard thread panicked");
    }

    cancelled
}

/// Open `path` with the serial line parameters in `settings`.
///
/// A device that was just plugged in may take a moment to be usable, so
/// opening is retried a few times, one second apart.
pub(crate) fn open_and_setup_port(
    settings: &Settings,
    path: &str,
) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(OPEN_ATTEMPTS - 1),
        |index| -> Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Opening {} (attempt {})", path, index);
            serialport::new(path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(Duration::from_millis(10))
                .open()
        },
    );
    let mut port = match result {
        Ok(port) => port,
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open {} after {:?} and {} tries: {}",
                path, total_delay, tries, error,
            );
            return Err(error);
        }
        Err(retry::Error::Internal(reason)) => {
            info!("Internal retry error while opening {}: {}", path, reason);
            return Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "internal error while retrying to open the port",
            ));
        }
    };

    // Some drivers ignore the builder values; apply them again.
    port.set_baud_rate(settings.baud_rate)?;
    port.set_data_bits(settings.data_bits)?;
    port.set_stop_bits(settings.stop_bits)?;
    port.set_parity(settings.parity)?;
    port.set_flow_control(settings.flow_control)?;

    let actual = port.baud_rate()?;
    if actual != settings.baud_rate {
        return Err(serialport::Error::new(
            serialport::ErrorKind::InvalidInput,
            format!(
                "baud rate {} was not accepted (port runs at {})",
                settings.baud_rate, actual
            ),
        ));
    }

    info!("Connected to {} at {} baud", path, actual);
    debug!("data_bits    : {:?}", port.data_bits());
    debug!("stop_bits    : {:?}", port.stop_bits());
    debug!("parity       : {:?}", port.parity());
    debug!("flow control : {:?}", port.flow_control());

    Ok(port)
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[SM] {spinner:.blue} {msg}"),
    );
    pb
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|detected| detected.starts_with(path))
}

/// Enumerates serial devices on the system. USB ports carry the manufacturer
/// and product of the controller after the port name.
fn enumerate_usb_serial_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => format!(
                    "{}: ({} / {})",
                    p.port_name,
                    info.manufacturer.as_ref().map_or("", String::as_str),
                    info.product.as_ref().map_or("", String::as_str)
                ),
                // Virtual ports are kept for testing.
                _ => p.port_name,
            })
            .collect(),
        Err(ref e) => {
            info!("error: {}", e);
            vec![]
        }
    }
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    match select.default(0).interact_on_opt(&term) {
        Ok(selection) => selection
            .and_then(|index| ports.get(index))
            .and_then(|port| port.split(':').next())
            .map(String::from),
        Err(e) => {
            info!("error: {}", e);
            None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn requested_port_prefix() {
    let ports = vec![
        "/dev/ttyUSB0: (Silicon Labs / CP2102)".to_owned(),
        "/dev/ttyS0".to_owned(),
    ];
    assert!(check_requested_port(&ports, "/dev/ttyUSB0"));
    assert!(check_requested_port(&ports, "/dev/ttyS0"));
    assert!(!check_requested_port(&ports, "/dev/ttyACM0"));
}
