use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Command, CommandId, CommandParameter, ControlId, ControlReading, DeviceId},
    protocol::{
        ApiResponse, CancelCommandForm, EnqueueCommandForm, PendingCommandsQuery, ReadingQuery,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    api::{CommandQueue, ReadingSource},
    auth::Credentials,
    error::ApiError,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Signed JSON-envelope client for one API host.
///
/// One instance can serve both the command queue and the reading endpoint,
/// or two instances can split them across hosts with separate credentials.
pub struct HttpApi {
    http: Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpApi {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        Self::with_timeout(base_url, credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed =
            Url::parse(base_url).with_context(|| format!("invalid api base url '{base_url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("api base url must start with http:// or https://: {base_url}");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: parsed,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ApiError::InvalidRequest(format!("base url cannot carry a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let mut request = request.build()?;
        self.credentials
            .sign(Utc::now(), request.method(), request.url().as_str())?
            .write_to(request.headers_mut())?;

        debug!(
            method = %request.method(),
            url = %request.url(),
            "toggler: api request"
        );
        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(status = status.as_u16(), "toggler: unreadable api response: {err}");
                return Err(ApiError::status(status));
            }
        };
        if !envelope.success {
            return Err(ApiError::application(status, envelope.message, envelope.code));
        }
        if !status.is_success() {
            return Err(ApiError::status(status));
        }
        Ok(envelope.data)
    }

    async fn send_for_data<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(request).await?.ok_or_else(|| ApiError::Status {
            status: StatusCode::OK,
            reason: "response envelope carried no data".into(),
        })
    }
}

#[async_trait]
impl CommandQueue for HttpApi {
    fn check_credentials(&self) -> Result<(), ApiError> {
        self.credentials.validate()
    }

    async fn enqueue_command(
        &self,
        device_id: &DeviceId,
        topic: &str,
        parameters: &[CommandParameter],
    ) -> Result<Command, ApiError> {
        let form = EnqueueCommandForm::new(topic, parameters).map_err(|err| {
            ApiError::InvalidRequest(format!("failed to encode command parameters: {err}"))
        })?;
        let url = self.endpoint(&["devices", device_id.as_str(), "commands"])?;
        self.send_for_data(self.http.post(url).form(&form)).await
    }

    async fn cancel_command(&self, command_id: &CommandId) -> Result<(), ApiError> {
        let url = self.endpoint(&["commands", command_id.as_str()])?;
        self.send::<serde_json::Value>(self.http.put(url).form(&CancelCommandForm::default()))
            .await?;
        Ok(())
    }

    async fn get_command(&self, command_id: &CommandId) -> Result<Command, ApiError> {
        let url = self.endpoint(&["commands", command_id.as_str()])?;
        self.send_for_data(self.http.get(url)).await
    }

    async fn pending_commands(&self, device_id: &DeviceId) -> Result<Vec<Command>, ApiError> {
        let url = self.endpoint(&["devices", device_id.as_str(), "commands"])?;
        Ok(self
            .send(self.http.get(url).query(&PendingCommandsQuery { pending: true }))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReadingSource for HttpApi {
    fn check_credentials(&self) -> Result<(), ApiError> {
        self.credentials.validate()
    }

    async fn most_recent_readings(
        &self,
        device_id: &DeviceId,
        control_id: &ControlId,
    ) -> Result<Vec<ControlReading>, ApiError> {
        let url = self.endpoint(&["devices", device_id.as_str(), "readings"])?;
        Ok(self
            .send(
                self.http
                    .get(url)
                    .query(&ReadingQuery {
                        source: control_id.to_string(),
                        latest: true,
                    }),
            )
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
