//! The session façade: connection lifecycle, mode entry, monitoring and the
//! command exchange loop.

use std::time::{Duration, Instant};

use hexplay::HexViewBuilder;
use log::{debug, error, info, log_enabled, trace, warn, Level::Trace};

use super::correlator::{Classification, CommandOutcome, Correlator};
use super::events::{EventBus, SessionEvent};
use super::handle::{Interrupt, SessionHandle};
use super::phase::{Phase, PhaseEvent};
use super::state::{DeviceInfo, LogSource, SessionState};
use crate::error::{SessionError, TransportError};
use crate::manifest::Manifest;
use crate::protocol::{self, Command, Message};
use crate::settings::Settings;
use crate::timeouts::{TEST_ALL_COMMAND, TEST_COMMAND_PREFIX};
use crate::transport::{Connector, Transport};

pub(crate) const ENTER_SERVICE_MODE: &str = "enter_service_mode";

/// Draining more stale lines than this before a send gets a warning.
const DRAIN_WARNING_LINES: usize = 256;

/// The only entry point to talk to a device.
///
/// A session owns the transport, the phase state machine and the
/// command/response correlator. It manages exactly one device at a time.
pub struct Session {
    pub(crate) settings: Settings,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    pub(crate) state: SessionState,
    pub(crate) correlator: Correlator,
    pub(crate) events: EventBus,
    handle: SessionHandle,
}

impl Session {
    /// A new session in the `Disconnected` phase. `connector` opens the
    /// transport when [`connect`](Session::connect) is called.
    pub fn new(settings: Settings, connector: Box<dyn Connector>) -> Self {
        Session {
            state: SessionState::new(settings.log_capacity),
            settings,
            connector,
            transport: None,
            correlator: Correlator::default(),
            events: EventBus::default(),
            handle: SessionHandle::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The manifest captured by the last successful `get_manifest`.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.state.manifest.as_ref()
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.state.device_info.as_ref()
    }

    /// A handle to interrupt this session from another thread.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Receive every [`SessionEvent`] from now on.
    pub fn subscribe(&mut self) -> std::sync::mpsc::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Open the transport on `port` and get ready to talk to the device.
    ///
    /// Only one session can be active: connecting while connected is rejected,
    /// whatever the port. A session in the `Error` phase must be disconnected
    /// first.
    pub fn connect(&mut self, port: &str) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Disconnected => {}
            Phase::Error => return Err(self.faulted()),
            _ => {
                return Err(SessionError::AlreadyConnected {
                    port: self.state.port.clone().unwrap_or_default(),
                })
            }
        }
        self.handle.clear();
        info!("Connecting to {}", port);
        self.state.port = Some(port.to_owned());

        let transport = match self.connector.open(&self.settings, port) {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail_transport(e)),
        };
        self.transport = Some(transport);
        self.transition(PhaseEvent::PortOpened)?;

        let prepared = match self.transport.as_mut() {
            Some(transport) => transport.prepare(),
            None => Err(TransportError::Closed),
        };
        if let Err(e) = prepared {
            return Err(self.fail_transport(e));
        }
        self.transition(PhaseEvent::TransportReady)
    }

    /// Close the transport and reset the session, from any phase.
    ///
    /// Any outstanding command is abandoned. The log buffer is kept when the
    /// settings ask for it. Disconnecting an idle session does nothing.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(command) = self.correlator.cancel() {
            info!("Abandoning `{}`", command);
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Error while closing {}: {}", transport.name(), e);
            }
        }
        if self.phase() != Phase::Disconnected {
            // Disconnect is defined from every phase.
            let _ = self.transition(PhaseEvent::Disconnect);
        }
        self.state.reset(self.settings.preserve_log);
        self.handle.clear();
    }

    // -------------------------------------------------------------------------
    // Service mode entry
    // -------------------------------------------------------------------------

    /// Put the device into service mode.
    ///
    /// The device only accepts the mode-entry command for a short window
    /// after boot, so the command is repeated at the retry interval until a
    /// beacon or an `ok` comes back, or the window elapses. Nothing is sent
    /// once this call returns.
    pub fn enter_service_mode(&mut self) -> Result<Message, SessionError> {
        self.require_connected()?;
        let enter = protocol::encode(&Command::new(ENTER_SERVICE_MODE))
            .map_err(SessionError::Encode)?;
        self.begin_wait()?;
        self.transition(PhaseEvent::EntryRequested)?;

        let window = self.settings.timeouts.mode_entry_window();
        let interval = self.tick();
        let started = Instant::now();
        let deadline = started + window;
        let mut next_send = started;
        let mut attempts: usize = 0;

        loop {
            match self.handle.take() {
                Some(Interrupt::Cancel) => {
                    info!("Service mode entry cancelled after {} attempts", attempts);
                    self.transition(PhaseEvent::EntryCancelled)?;
                    return Err(SessionError::Cancelled);
                }
                Some(Interrupt::Disconnect) => {
                    self.teardown();
                    return Err(SessionError::Cancelled);
                }
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "No acknowledgment after {} attempts in {:?}",
                    attempts, window
                );
                self.state.last_error =
                    Some(format!("service mode window of {:?} expired", window));
                self.transition(PhaseEvent::WindowExpired)?;
                return Err(SessionError::WindowExpired { window });
            }
            if now >= next_send {
                self.write(&enter)?;
                attempts += 1;
                next_send = now + interval;
            }

            let wait = next_send.min(deadline).saturating_duration_since(Instant::now());
            let message = match self.read_message(wait)? {
                Some(message) => message,
                None => continue,
            };
            if message.is_beacon() || message.is_success() {
                info!(
                    "Service mode acknowledged after {} attempts in {:?}",
                    attempts,
                    started.elapsed()
                );
                if message.is_beacon() {
                    self.on_beacon(&message);
                } else {
                    if let Some(data) = &message.data {
                        self.state.device_info_mut().merge(data);
                    }
                    self.events.publish(SessionEvent::Response(message.clone()));
                }
                self.transition(PhaseEvent::Acknowledged)?;
                return Ok(message);
            }

            let fault = protocol::DeviceError::from_message(&message).filter(|e| e.is_fatal());
            self.events.publish(SessionEvent::Unsolicited(message.clone()));
            if let Some(fault) = fault {
                error!("Device refused service mode: {}", fault);
                self.state.last_error = Some(fault.to_string());
                if fault.code == "window_expired" {
                    self.transition(PhaseEvent::WindowExpired)?;
                    return Err(SessionError::WindowExpired { window });
                }
                self.transition(PhaseEvent::ProtocolFault)?;
                return Err(SessionError::Faulted {
                    reason: fault.to_string(),
                });
            }
            debug!("Ignoring {} while entering service mode", message);
        }
    }

    // -------------------------------------------------------------------------
    // Monitoring
    // -------------------------------------------------------------------------

    /// Switch to read-only monitoring. Commands are rejected until
    /// [`stop_monitoring`](Session::stop_monitoring).
    pub fn start_monitoring(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.transition(PhaseEvent::MonitorRequested)
    }

    /// Leave monitoring, back to the phase it was started from.
    pub fn stop_monitoring(&mut self) -> Result<Phase, SessionError> {
        self.transition(PhaseEvent::MonitorExited)?;
        Ok(self.phase())
    }

    /// Wait up to the beacon poll timeout for the next beacon. Other messages
    /// received meanwhile are surfaced as events.
    pub fn wait_for_beacon(&mut self) -> Result<Option<Message>, SessionError> {
        let timeout = self.settings.timeouts.beacon_poll();
        let mut messages = self.listen_for(timeout, true)?;
        Ok(messages.pop().filter(Message::is_beacon))
    }

    /// Process device output for `duration`, returning the decoded messages
    /// in arrival order.
    pub fn listen(&mut self, duration: Duration) -> Result<Vec<Message>, SessionError> {
        self.listen_for(duration, false)
    }

    fn listen_for(
        &mut self,
        duration: Duration,
        stop_on_beacon: bool,
    ) -> Result<Vec<Message>, SessionError> {
        self.require_connected()?;
        self.begin_wait()?;
        let deadline = Instant::now() + duration;
        let mut messages = Vec::new();
        loop {
            match self.handle.take() {
                Some(Interrupt::Cancel) => return Err(SessionError::Cancelled),
                Some(Interrupt::Disconnect) => {
                    self.teardown();
                    return Err(SessionError::Cancelled);
                }
                None => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(messages);
            }
            let wait = self.tick().min(deadline - now);
            if let Some(message) = self.read_message(wait)? {
                self.dispatch_idle(&message);
                let beacon = message.is_beacon();
                messages.push(message);
                if stop_on_beacon && beacon {
                    return Ok(messages);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Command exchange
    // -------------------------------------------------------------------------

    /// Send `command` and wait for its response under the timeout the
    /// [`TimeoutPolicy`](crate::TimeoutPolicy) assigns to its name.
    ///
    /// Rejected without sending anything unless the device is in service
    /// mode. Once a manifest is cached, a test the device does not list and
    /// a custom command with invalid parameters are rejected the same way.
    /// A device error or a timeout is a [`CommandOutcome`]; the session
    /// stays in service mode unless the device reports a fatal error.
    pub fn send_command(&mut self, command: Command) -> Result<CommandOutcome, SessionError> {
        self.ensure_ready()?;
        self.check_manifest(&command)?;
        let timeout = self.settings.timeouts.for_command(command.name());
        self.execute(command, timeout)
    }

    /// Hold `command` against the cached manifest, if any.
    fn check_manifest(&self, command: &Command) -> Result<(), SessionError> {
        let manifest = match &self.state.manifest {
            Some(manifest) => manifest,
            None => return Ok(()),
        };
        let name = command.name();
        if name != TEST_ALL_COMMAND {
            if let Some(test) = name.strip_prefix(TEST_COMMAND_PREFIX) {
                if !manifest.supports_test(test) {
                    return Err(SessionError::UnsupportedTest(test.to_owned()));
                }
            }
        }
        match manifest.command(name) {
            Some(definition) => definition.validate(command.data()),
            None => Ok(()),
        }
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.phase() {
            Phase::InServiceMode => Ok(()),
            Phase::ExecutingCommand => Err(SessionError::CommandPending {
                pending: self
                    .correlator
                    .pending()
                    .map(|pending| pending.command.clone())
                    .unwrap_or_default(),
            }),
            phase => Err(SessionError::NotReady { phase }),
        }
    }

    pub(crate) fn execute(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<CommandOutcome, SessionError> {
        self.ensure_ready()?;
        let bytes = protocol::encode(&command).map_err(SessionError::Encode)?;
        self.begin_wait()?;
        // Only lines arriving after the send may resolve the command.
        self.drain_input()?;

        self.correlator
            .begin(command.name(), timeout, Instant::now())?;
        self.transition(PhaseEvent::CommandIssued)?;
        if let Err(e) = self.write(&bytes) {
            self.correlator.cancel();
            return Err(e);
        }

        loop {
            match self.handle.take() {
                Some(Interrupt::Cancel) => {
                    self.correlator.cancel();
                    info!("`{}` cancelled", command.name());
                    self.transition(PhaseEvent::CommandResolved)?;
                    return Err(SessionError::Cancelled);
                }
                Some(Interrupt::Disconnect) => {
                    self.teardown();
                    return Err(SessionError::Cancelled);
                }
                None => {}
            }

            let now = Instant::now();
            if let Some(outcome) = self.correlator.expire(now) {
                warn!("{}", outcome);
                self.state.last_error = Some(outcome.describe());
                self.transition(PhaseEvent::CommandResolved)?;
                return Ok(outcome);
            }
            let wait = self
                .correlator
                .remaining(now)
                .unwrap_or_default()
                .min(self.tick());

            let message = match self.read_message(wait)? {
                Some(message) => message,
                None => continue,
            };
            let sent_at = self.correlator.pending().map(|pending| pending.sent_at);
            match self.correlator.classify(message) {
                Classification::Beacon(beacon) => self.on_beacon(&beacon),
                Classification::Resolved(outcome) => {
                    if let Some(sent_at) = sent_at {
                        debug!("`{}` resolved after {:?}", command.name(), sent_at.elapsed());
                    }
                    return self.resolve(outcome);
                }
                Classification::Unsolicited(message) => self.dispatch_idle(&message),
            }
        }
    }

    fn resolve(&mut self, outcome: CommandOutcome) -> Result<CommandOutcome, SessionError> {
        if let Some(response) = outcome.response() {
            self.events.publish(SessionEvent::Response(response.clone()));
        }
        if !outcome.is_success() {
            self.state.last_error = Some(outcome.describe());
        }
        match outcome.device_error() {
            Some(fault) if fault.is_fatal() => {
                error!("Device reported a fatal error: {}", fault);
                self.transition(PhaseEvent::ProtocolFault)?;
            }
            _ => self.transition(PhaseEvent::CommandResolved)?,
        }
        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn transition(&mut self, event: PhaseEvent) -> Result<(), SessionError> {
        let transition = self.state.machine.apply(event)?;
        if transition.from != transition.to {
            info!("=> {:?}", transition.to);
            let note = format!("{} -> {}", transition.from, transition.to);
            self.state.push_log(LogSource::Session, note);
            self.events.publish(SessionEvent::PhaseChanged {
                from: transition.from,
                to: transition.to,
            });
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Disconnected => Err(SessionError::NotConnected),
            Phase::Error => Err(self.faulted()),
            _ => Ok(()),
        }
    }

    fn faulted(&self) -> SessionError {
        SessionError::Faulted {
            reason: self
                .state
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".into()),
        }
    }

    /// Drop stale cancel requests and honour a pending disconnect.
    fn begin_wait(&mut self) -> Result<(), SessionError> {
        self.handle.clear_cancel();
        if self.handle.take() == Some(Interrupt::Disconnect) {
            self.teardown();
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    /// How often waits wake up to check for interruptions.
    fn tick(&self) -> Duration {
        self.settings
            .timeouts
            .mode_entry_retry()
            .max(Duration::from_millis(1))
    }

    /// Record a transport failure: the session moves to `Error` and stays
    /// there until disconnected.
    fn fail_transport(&mut self, e: TransportError) -> SessionError {
        error!("Transport failure: {}", e);
        self.correlator.cancel();
        self.state.last_error = Some(e.to_string());
        // Transport failure is defined from every phase.
        let _ = self.transition(PhaseEvent::TransportFailed);
        SessionError::Transport(e)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let written = match self.transport.as_mut() {
            Some(transport) => transport.write_line(bytes),
            None => Err(TransportError::Closed),
        };
        if let Err(e) = written {
            return Err(self.fail_transport(e));
        }
        let text = String::from_utf8_lossy(bytes).trim_end().to_owned();
        debug!("--> {}", text);
        self.state.push_log(LogSource::Host, text.clone());
        self.events.publish(SessionEvent::Sent(text));
        Ok(())
    }

    fn read_line(&mut self, wait: Duration) -> Result<Option<String>, SessionError> {
        let read = match self.transport.as_mut() {
            Some(transport) => transport.read_line(wait),
            None => Err(TransportError::Closed),
        };
        read.map_err(|e| self.fail_transport(e))
    }

    /// Decode `line`, logging it either way. Noise yields `None`.
    fn process_line(&mut self, line: String) -> Option<Message> {
        match protocol::decode(&line) {
            Some(message) => {
                debug!("<-- {}", line.trim_end());
                self.state.push_log(LogSource::Device, line);
                Some(message)
            }
            None => {
                if line.trim().is_empty() {
                    return None;
                }
                if log_enabled!(Trace) {
                    let view = HexViewBuilder::new(line.as_bytes())
                        .address_offset(0)
                        .row_width(16)
                        .finish();
                    trace!("noise:\n{}", view);
                }
                self.state.push_log(LogSource::Noise, line.clone());
                self.events.publish(SessionEvent::Noise(line));
                None
            }
        }
    }

    fn read_message(&mut self, wait: Duration) -> Result<Option<Message>, SessionError> {
        match self.read_line(wait)? {
            Some(line) => Ok(self.process_line(line)),
            None => Ok(None),
        }
    }

    /// Process whatever was received before now without waiting.
    fn drain_input(&mut self) -> Result<(), SessionError> {
        let mut drained: usize = 0;
        while let Some(line) = self.read_line(Duration::ZERO)? {
            drained += 1;
            if drained == DRAIN_WARNING_LINES {
                warn!("Draining more than {} stale lines", DRAIN_WARNING_LINES);
            }
            if let Some(message) = self.process_line(line) {
                self.dispatch_idle(&message);
            }
        }
        Ok(())
    }

    /// A beacon may arrive at any time, including while a command is
    /// outstanding. It refreshes the cached device info but never resolves
    /// the command.
    fn on_beacon(&mut self, beacon: &Message) {
        trace!("beacon {}", beacon);
        self.state.last_beacon = Some(beacon.received_at);
        if let Some(data) = &beacon.data {
            self.state.device_info_mut().merge(data);
        }
        self.events.publish(SessionEvent::Beacon(beacon.clone()));
    }

    /// A message received while no command is outstanding.
    fn dispatch_idle(&mut self, message: &Message) {
        if message.is_beacon() {
            self.on_beacon(message);
        } else {
            debug!("Unsolicited {}", message);
            self.events.publish(SessionEvent::Unsolicited(message.clone()));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.is_some() {
            self.teardown();
        }
    }
}
