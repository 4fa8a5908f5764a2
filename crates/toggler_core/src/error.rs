use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the command queue and reading endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The signing key is missing or unusable; raised before any request is made.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A response arrived but was not a usable envelope.
    #[error("HTTP {}: {reason}", status.as_u16())]
    Status { status: StatusCode, reason: String },

    /// The request produced no response at all.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The request could not be built locally, so nothing was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The envelope reported `success: false`.
    #[error("{}", display_application(message, code.as_deref()))]
    Application {
        message: String,
        code: Option<String>,
    },
}

fn display_application(message: &str, code: Option<&str>) -> String {
    match code {
        Some(code) => format!("{message} ({code})"),
        None => message.to_string(),
    }
}

impl ApiError {
    pub(crate) fn status(status: StatusCode) -> Self {
        ApiError::Status {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }

    pub(crate) fn application(
        status: StatusCode,
        message: Option<String>,
        code: Option<String>,
    ) -> Self {
        ApiError::Application {
            message: message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            code,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Status { .. } | ApiError::Request(_) | ApiError::InvalidRequest(_)
        )
    }

    pub fn is_application(&self) -> bool {
        matches!(self, ApiError::Application { .. })
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, ApiError::InvalidCredentials(_))
    }
}
