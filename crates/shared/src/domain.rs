use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::SET_CONTROL_PARAMETER_TOPIC;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(DeviceId);
id_newtype!(ControlId);
id_newtype!(CommandId);

/// A control value as reported by the remote side or requested by a caller.
///
/// The remote API is loose about representation: the same logical value may
/// come back as `true`, `1` or `"1"`. Use [`loosely_equal`] to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ControlValue {
    /// Numeric view of the value: booleans map to 0/1, text is trimmed and
    /// parsed with empty text counting as 0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ControlValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            ControlValue::Number(value) if value.is_nan() => None,
            ControlValue::Number(value) => Some(*value),
            ControlValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse::<f64>().ok().filter(|value| !value.is_nan())
                }
            }
        }
    }

    /// Parses a value typed by a person: booleans and numbers are recognised,
    /// anything else stays text.
    pub fn parse_loose(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => ControlValue::Bool(true),
            "false" => ControlValue::Bool(false),
            _ => match trimmed.parse::<f64>() {
                Ok(number) if !trimmed.is_empty() => ControlValue::Number(number),
                _ => ControlValue::Text(raw.to_string()),
            },
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(value) => write!(f, "{value}"),
            ControlValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            ControlValue::Number(value) => write!(f, "{value}"),
            ControlValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Bool(value)
    }
}

impl From<i64> for ControlValue {
    fn from(value: i64) -> Self {
        ControlValue::Number(value as f64)
    }
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        ControlValue::Number(f64::from(value))
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        ControlValue::Number(value)
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        ControlValue::Text(value.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(value: String) -> Self {
        ControlValue::Text(value)
    }
}

/// Compares two optional values the way the remote API means them.
///
/// Two absent values are equal; an absent value never equals a present one.
/// Two text values compare as strings, every other pairing compares
/// numerically after coercion.
pub fn loosely_equal(left: Option<&ControlValue>, right: Option<&ControlValue>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(_), None) | (None, Some(_)) => false,
        (Some(ControlValue::Text(left)), Some(ControlValue::Text(right))) => left == right,
        (Some(left), Some(right)) => match (left.as_number(), right.as_number()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    Queuing,
    Queued,
    Received,
    Executing,
    Completed,
    Declined,
}

impl CommandState {
    pub const ACTIVE_STATES: [CommandState; 4] = [
        CommandState::Queuing,
        CommandState::Queued,
        CommandState::Received,
        CommandState::Executing,
    ];

    pub const FINISHED_STATES: [CommandState; 2] =
        [CommandState::Completed, CommandState::Declined];

    pub fn is_active(self) -> bool {
        Self::ACTIVE_STATES.contains(&self)
    }

    pub fn is_finished(self) -> bool {
        Self::FINISHED_STATES.contains(&self)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    pub value: ControlValue,
}

impl CommandParameter {
    pub fn new(name: impl Into<String>, value: impl Into<ControlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One queued state-change request as the remote command queue reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: CommandId,
    pub created_at: DateTime<Utc>,
    pub topic: String,
    pub state: CommandState,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

impl Command {
    /// True when the first parameter names `control_id`.
    pub fn targets(&self, control_id: &ControlId) -> bool {
        self.parameters
            .first()
            .is_some_and(|parameter| parameter.name == control_id.0)
    }

    pub fn requested_value(&self) -> Option<&ControlValue> {
        self.parameters.first().map(|parameter| &parameter.value)
    }

    pub fn is_set_control_parameter(&self) -> bool {
        self.topic == SET_CONTROL_PARAMETER_TOPIC
    }
}

/// A timestamped observation of a control's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReading {
    pub created_at: DateTime<Utc>,
    pub source_id: ControlId,
    pub value: ControlValue,
}
