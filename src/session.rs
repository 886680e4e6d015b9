//! The device session.
//!
//! ```text
//! Disconnected --connect--> Connecting --ready--> WaitingForDevice
//!                                                   |          ^
//!                                enter_service_mode |          | cancel, exit, reboot
//!                                                   v          |
//!                                         EnteringServiceMode -+
//!                                           |             |
//!                              beacon / ok  |             | window expired
//!                                           v             v
//!   ExecutingCommand <--send-- InServiceMode            Error
//!          |                     ^    |  ^
//!          +------resolved-------+    |  | stop_monitoring
//!                    start_monitoring v  |
//!                                   Monitoring
//!
//! disconnect: any phase --> Disconnected
//! transport failure, fatal device error: any connected phase --> Error
//! ```
//!
//! **Example** - Running every supported test:
//! ```no_run
//! use servicemode::{SerialConnector, Session, SettingsBuilder};
//!
//! let mut session = Session::new(SettingsBuilder::new().finalize(), Box::new(SerialConnector));
//! session.connect("/dev/ttyUSB0")?;
//! session.enter_service_mode()?;
//! session.get_manifest()?;
//! let summary = session.test_all()?;
//! println!("{} passed, {} failed", summary.passed(), summary.failed());
//! # Ok::<(), servicemode::SessionError>(())
//! ```

mod commands;
mod correlator;
mod driver;
mod events;
mod handle;
mod orchestrator;
mod phase;
mod state;

pub use commands::ProvisionRequest;
pub use correlator::CommandOutcome;
pub use driver::Session;
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use phase::{Phase, PhaseEvent};
pub use state::{
    DeviceInfo, LogLine, LogSource, SessionState, TestResult, TestRunSummary, TestStatus,
};
