use serde::{Deserialize, Serialize};

use crate::domain::{CommandParameter, CommandState};

/// Topic of every command this client enqueues.
pub const SET_CONTROL_PARAMETER_TOPIC: &str = "SetControlParameter";

/// Envelope wrapped around every API response body.
///
/// `success: false` is an application-level failure whatever the HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            code: None,
        }
    }

    pub fn failure(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code,
        }
    }
}

/// Form body of the enqueue call. `parameters` is a JSON array of
/// `{name, value}` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueCommandForm {
    pub topic: String,
    pub parameters: String,
}

impl EnqueueCommandForm {
    pub fn new(topic: &str, parameters: &[CommandParameter]) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.to_string(),
            parameters: serde_json::to_string(parameters)?,
        })
    }

    pub fn decode_parameters(&self) -> serde_json::Result<Vec<CommandParameter>> {
        serde_json::from_str(&self.parameters)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelCommandForm {
    pub state: CommandState,
}

impl Default for CancelCommandForm {
    fn default() -> Self {
        Self {
            state: CommandState::Declined,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommandsQuery {
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingQuery {
    pub source: String,
    pub latest: bool,
}
