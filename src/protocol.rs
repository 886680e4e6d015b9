//! The service-mode line protocol.
//!
//! Every line exchanged with the device is a single JSON object terminated by
//! a newline:
//!
//! ```text
//! host   -> device : {"cmd":"get_status"}
//! host   -> device : {"cmd":"provision","data":{"unit_id":"SV-HUB-000123"}}
//! device -> host   : {"status":"service_mode","data":{"device_type":"hub"}}
//! device -> host   : {"status":"error","message":"wifi_connect_failed"}
//! ```
//!
//! Anything else on the line (boot logs, firmware prints) is noise and is
//! ignored by [`decode`].
//!
//! **Example** - Encoding a command and decoding a response:
//! ```
//! use servicemode::protocol::{self, Command, Status};
//!
//! let bytes = protocol::encode(&Command::new("get_status")).unwrap();
//! assert_eq!(bytes, b"{\"cmd\":\"get_status\"}\n");
//!
//! let message = protocol::decode("{\"status\":\"ok\"}").unwrap();
//! assert_eq!(message.status, Status::Ok);
//! assert!(protocol::decode("I (312) boot: ESP-IDF v5.1").is_none());
//! ```

mod codec;
mod command;
mod error_codes;
mod message;

pub use codec::{decode, encode};
pub use command::{Command, CommandData, ParamValue};
pub use error_codes::{describe, DeviceError, Severity};
pub use message::{Message, Status};
