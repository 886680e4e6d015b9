//! Custom command definitions and parameter validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::protocol::{CommandData, ParamValue};

/// The declared type of a custom command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
        })
    }
}

/// One parameter of a custom command.
///
/// `min`/`max` bound the value of numeric parameters and the length (in
/// characters) of string parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CommandParameter {
    fn check(&self, value: &ParamValue) -> Result<(), String> {
        let measured = match (self.kind, value) {
            (ParamType::Bool, ParamValue::Bool(_)) => return Ok(()),
            (ParamType::Int, ParamValue::Int(v)) => *v as f64,
            (ParamType::Float, ParamValue::Int(_)) | (ParamType::Float, ParamValue::Float(_)) => {
                value.as_f64().unwrap_or_default()
            }
            (ParamType::String, ParamValue::Text(s)) => s.chars().count() as f64,
            (expected, got) => {
                return Err(format!("expected {}, got {}", expected, got.type_name()));
            }
        };
        let what = if self.kind == ParamType::String {
            "length"
        } else {
            "value"
        };
        if let Some(min) = self.min {
            if measured < min {
                return Err(format!("{} {} is below the minimum {}", what, measured, min));
            }
        }
        if let Some(max) = self.max {
            if measured > max {
                return Err(format!("{} {} is above the maximum {}", what, measured, max));
            }
        }
        Ok(())
    }
}

/// A device-declared custom command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "parameters")]
    pub params: Vec<CommandParameter>,
}

impl CommandDefinition {
    /// Check `data` against the declared parameters: every required
    /// parameter is present, nothing undeclared is passed, and every value has
    /// the declared type and lies within the declared bounds.
    pub fn validate(&self, data: &CommandData) -> Result<(), SessionError> {
        if let Some(unknown) = data
            .keys()
            .find(|key| !self.params.iter().any(|param| &param.name == *key))
        {
            return Err(SessionError::UnknownParameter {
                command: self.name.clone(),
                param: unknown.clone(),
            });
        }
        for param in &self.params {
            match data.get(&param.name) {
                None if param.required => {
                    return Err(SessionError::MissingParameter {
                        command: self.name.clone(),
                        param: param.name.clone(),
                    });
                }
                None => {}
                Some(value) => {
                    param
                        .check(value)
                        .map_err(|reason| SessionError::InvalidParameter {
                            command: self.name.clone(),
                            param: param.name.clone(),
                            reason,
                        })?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
