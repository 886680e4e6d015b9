//! Outbound requests.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A typed command parameter value.
///
/// Custom command parameters are validated against the parameter schema the
/// device declares in its manifest before anything is encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
        }
    }

    /// The numeric value, if this is an integer or a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}
impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}
impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}
impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v.into())
    }
}
impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}
impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_owned())
    }
}
impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// The `data` payload of a command.
pub type CommandData = BTreeMap<String, ParamValue>;

/// An outbound request: a command name plus optional data.
///
/// A command is immutable once built and always encodes to the same bytes.
/// Commands carry no correlation identifier; the device answers them strictly
/// in order, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    cmd: String,
    data: CommandData,
}

impl Command {
    pub fn new<S: Into<String>>(cmd: S) -> Self {
        Command {
            cmd: cmd.into(),
            data: CommandData::new(),
        }
    }

    pub fn with_data<S: Into<String>>(cmd: S, data: CommandData) -> Self {
        Command {
            cmd: cmd.into(),
            data,
        }
    }

    /// Add one data entry, consuming the command.
    pub fn param<K: Into<String>, V: Into<ParamValue>>(mut self, key: K, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.cmd
    }

    pub fn data(&self) -> &CommandData {
        &self.data
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cmd)?;
        if !self.data.is_empty() {
            let params: Vec<String> = self
                .data
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " {{{}}}", params.join(", "))?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn builder_params() {
    let cmd = Command::new("set_volume").param("level", 7).param("mute", false);
    assert_eq!(cmd.name(), "set_volume");
    assert_eq!(cmd.data().get("level"), Some(&ParamValue::Int(7)));
    assert_eq!(cmd.data().get("mute"), Some(&ParamValue::Bool(false)));
}

#[test]
fn display() {
    assert_eq!(Command::new("reboot").to_string(), "reboot");
    let cmd = Command::new("provision").param("unit_id", "SV-1");
    assert_eq!(cmd.to_string(), "provision {unit_id=\"SV-1\"}");
}

#[test]
fn numeric_values() {
    assert_eq!(ParamValue::from(3u32).as_f64(), Some(3.0));
    assert_eq!(ParamValue::from(2.5).as_f64(), Some(2.5));
    assert_eq!(ParamValue::from("x").as_f64(), None);
}
