use async_trait::async_trait;
use shared::domain::{Command, CommandId, CommandParameter, ControlId, ControlReading, DeviceId};

use crate::error::ApiError;

/// The remote command queue of a device.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Fails with [`ApiError::InvalidCredentials`] when requests cannot be signed.
    fn check_credentials(&self) -> Result<(), ApiError>;

    async fn enqueue_command(
        &self,
        device_id: &DeviceId,
        topic: &str,
        parameters: &[CommandParameter],
    ) -> Result<Command, ApiError>;

    /// Marks the command as declined on the remote side.
    async fn cancel_command(&self, command_id: &CommandId) -> Result<(), ApiError>;

    async fn get_command(&self, command_id: &CommandId) -> Result<Command, ApiError>;

    async fn pending_commands(&self, device_id: &DeviceId) -> Result<Vec<Command>, ApiError>;
}

/// The state-reading endpoint. May live on a different host than the queue.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    fn check_credentials(&self) -> Result<(), ApiError>;

    /// Latest readings for the device; callers filter by `source_id`.
    async fn most_recent_readings(
        &self,
        device_id: &DeviceId,
        control_id: &ControlId,
    ) -> Result<Vec<ControlReading>, ApiError>;
}
