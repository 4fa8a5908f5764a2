use std::{sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use shared::{
    domain::{
        loosely_equal, Command, CommandId, CommandParameter, CommandState, ControlId,
        ControlReading, ControlValue, DeviceId,
    },
    protocol::SET_CONTROL_PARAMETER_TOPIC,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    api::{CommandQueue, ReadingSource},
    error::ApiError,
    merge::{merge_value, select_active_command, select_reading},
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PENDING_REFRESH_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_START_DELAY: Duration = Duration::from_millis(20);

/// Receives a call after every change-producing `set_value` or `update`, and
/// after every failed one with the error attached.
///
/// Errors returned here are logged and dropped.
pub trait ToggleObserver: Send + Sync {
    fn on_change(&self, toggler: &ControlToggler, error: Option<&ApiError>) -> anyhow::Result<()>;
}

impl<F> ToggleObserver for F
where
    F: Fn(&ControlToggler, Option<&ApiError>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_change(&self, toggler: &ControlToggler, error: Option<&ApiError>) -> anyhow::Result<()> {
        self(toggler, error)
    }
}

struct TogglerState {
    last_reading: Option<ControlReading>,
    last_command: Option<Command>,
    poll_timer: Option<JoinHandle<()>>,
    refresh: Duration,
    pending_refresh: Duration,
}

impl TogglerState {
    fn has_pending_state_change(&self) -> bool {
        self.last_command
            .as_ref()
            .is_some_and(|command| command.state.is_active())
    }

    fn current_refresh(&self) -> Duration {
        if self.has_pending_state_change() {
            self.pending_refresh
        } else {
            self.refresh
        }
    }
}

/// Keeps one remote control in sync with what callers ask of it.
///
/// Changes go through the device's command queue and are only confirmed by a
/// later state reading, so the toggler caches both the last reading and the
/// last relevant command and merges them into a single value.
pub struct ControlToggler {
    commands: Arc<dyn CommandQueue>,
    readings: Arc<dyn ReadingSource>,
    device_id: DeviceId,
    control_id: ControlId,
    inner: Mutex<TogglerState>,
    observer: RwLock<Option<Arc<dyn ToggleObserver>>>,
}

impl ControlToggler {
    pub fn new<A>(api: Arc<A>, device_id: DeviceId, control_id: ControlId) -> Arc<Self>
    where
        A: CommandQueue + ReadingSource + 'static,
    {
        Self::new_with_reading_source(api.clone(), api, device_id, control_id)
    }

    pub fn new_with_reading_source(
        commands: Arc<dyn CommandQueue>,
        readings: Arc<dyn ReadingSource>,
        device_id: DeviceId,
        control_id: ControlId,
    ) -> Arc<Self> {
        Arc::new(Self {
            commands,
            readings,
            device_id,
            control_id,
            inner: Mutex::new(TogglerState {
                last_reading: None,
                last_command: None,
                poll_timer: None,
                refresh: DEFAULT_REFRESH_INTERVAL,
                pending_refresh: DEFAULT_PENDING_REFRESH_INTERVAL,
            }),
            observer: RwLock::new(None),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn control_id(&self) -> &ControlId {
        &self.control_id
    }

    /// Value of the last reading, `None` until the first successful refresh.
    pub fn value(&self) -> Option<ControlValue> {
        self.inner
            .lock()
            .last_reading
            .as_ref()
            .map(|reading| reading.value.clone())
    }

    pub fn last_reading(&self) -> Option<ControlReading> {
        self.inner.lock().last_reading.clone()
    }

    pub fn last_command(&self) -> Option<Command> {
        self.inner.lock().last_command.clone()
    }

    pub fn has_pending_state_change(&self) -> bool {
        self.inner.lock().has_pending_state_change()
    }

    pub fn current_refresh(&self) -> Duration {
        self.inner.lock().current_refresh()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.lock().refresh
    }

    pub fn set_refresh_interval(&self, interval: Duration) {
        self.inner.lock().refresh = interval;
    }

    pub fn pending_refresh_interval(&self) -> Duration {
        self.inner.lock().pending_refresh
    }

    pub fn set_pending_refresh_interval(&self, interval: Duration) {
        self.inner.lock().pending_refresh = interval;
    }

    pub fn set_observer(&self, observer: impl ToggleObserver + 'static) {
        *self.observer.write() = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        self.observer.write().take();
    }

    /// Drives the control towards `desired`.
    ///
    /// Cancels a queued command that asks for something else, then enqueues
    /// a new command unless the control already has, or is already about to
    /// have, the desired value. Returns the command in effect afterwards.
    pub async fn set_value(
        self: &Arc<Self>,
        desired: impl Into<ControlValue>,
    ) -> Result<Option<Command>, ApiError> {
        let desired = desired.into();
        self.commands.check_credentials()?;

        let (cancel, enqueue) = {
            let mut state = self.inner.lock();
            let cancel = state
                .last_command
                .as_ref()
                .filter(|command| {
                    command.state == CommandState::Queued
                        && !loosely_equal(command.requested_value(), Some(&desired))
                })
                .map(|command| command.id.clone());
            if cancel.is_some() {
                state.last_command = None;
            }

            let current = state.last_reading.as_ref().map(|reading| &reading.value);
            let pending = state
                .last_command
                .as_ref()
                .and_then(|command| command.requested_value());
            let enqueue = !loosely_equal(current, Some(&desired))
                && !loosely_equal(pending, Some(&desired));

            if cancel.is_none() && !enqueue {
                debug!(
                    device_id = %self.device_id,
                    control_id = %self.control_id,
                    desired = %desired,
                    "toggler: value already current or pending"
                );
                return Ok(state.last_command.clone());
            }
            (cancel, enqueue)
        };

        match self.issue_change(cancel, enqueue, &desired).await {
            Ok(command) => {
                {
                    let mut state = self.inner.lock();
                    state.last_command = command.clone();
                    self.reschedule(&mut state);
                }
                self.notify(None);
                Ok(command)
            }
            Err(err) => {
                warn!(
                    device_id = %self.device_id,
                    control_id = %self.control_id,
                    desired = %desired,
                    "toggler: set value failed: {err}"
                );
                self.notify(Some(&err));
                Err(err)
            }
        }
    }

    async fn issue_change(
        &self,
        cancel: Option<CommandId>,
        enqueue: bool,
        desired: &ControlValue,
    ) -> Result<Option<Command>, ApiError> {
        if let Some(command_id) = cancel {
            info!(
                device_id = %self.device_id,
                control_id = %self.control_id,
                command_id = %command_id,
                "toggler: cancelling queued command"
            );
            self.commands.cancel_command(&command_id).await?;
            // A refresh may have restored the command while the cancel was in flight.
            self.inner.lock().last_command = None;
        }

        if !enqueue {
            return Ok(None);
        }

        let parameters = [CommandParameter::new(
            self.control_id.as_str(),
            desired.to_string(),
        )];
        let command = self
            .commands
            .enqueue_command(&self.device_id, SET_CONTROL_PARAMETER_TOPIC, &parameters)
            .await?;
        info!(
            device_id = %self.device_id,
            control_id = %self.control_id,
            command_id = %command.id,
            state = %command.state,
            "toggler: command enqueued"
        );
        Ok(Some(command))
    }

    /// Re-reads the control and its pending commands.
    ///
    /// Returns the stored reading value after the refresh, the same as
    /// [`value`](Self::value). While a command is still active this is the
    /// last reported value, not the command's requested one.
    ///
    /// When polling is on, the next refresh is scheduled whether or not this
    /// one succeeded. Invalid credentials are not reported to the observer.
    pub async fn update(self: &Arc<Self>) -> Result<Option<ControlValue>, ApiError> {
        if let Err(err) = self.readings.check_credentials() {
            self.reschedule(&mut self.inner.lock());
            warn!(
                device_id = %self.device_id,
                control_id = %self.control_id,
                "toggler: refresh skipped: {err}"
            );
            return Err(err);
        }

        let tracked = self
            .inner
            .lock()
            .last_command
            .clone()
            .filter(|command| !command.state.is_finished());
        let lookup = async {
            match &tracked {
                Some(command) => self.commands.get_command(&command.id).await.map(Some),
                None => Ok(None),
            }
        };

        let outcome = futures::try_join!(
            self.readings
                .most_recent_readings(&self.device_id, &self.control_id),
            self.commands.pending_commands(&self.device_id),
            lookup,
        );

        match outcome {
            Ok((readings, pending, looked_up)) => {
                let (value, changed) = {
                    let mut state = self.inner.lock();
                    let changed = self.apply_refresh(&mut state, &readings, &pending, looked_up);
                    self.reschedule(&mut state);
                    let value = state
                        .last_reading
                        .as_ref()
                        .map(|reading| reading.value.clone());
                    (value, changed)
                };
                if changed {
                    debug!(
                        device_id = %self.device_id,
                        control_id = %self.control_id,
                        value = ?value,
                        "toggler: control state changed"
                    );
                    self.notify(None);
                }
                Ok(value)
            }
            Err(err) => {
                self.reschedule(&mut self.inner.lock());
                warn!(
                    device_id = %self.device_id,
                    control_id = %self.control_id,
                    "toggler: refresh failed: {err}"
                );
                self.notify(Some(&err));
                Err(err)
            }
        }
    }

    fn apply_refresh(
        &self,
        state: &mut TogglerState,
        readings: &[ControlReading],
        pending: &[Command],
        looked_up: Option<Command>,
    ) -> bool {
        let reading = select_reading(readings, &self.control_id).cloned();
        let active = select_active_command(pending, &self.control_id).cloned();
        let merged = merge_value(
            reading.as_ref(),
            looked_up
                .as_ref()
                .or(active.as_ref())
                .or(state.last_command.as_ref()),
        );

        let current = state.last_reading.as_ref().map(|reading| &reading.value);
        let changed = looked_up.is_some() || !loosely_equal(merged.as_ref(), current);
        if !changed {
            return false;
        }

        let command = looked_up.or(active);
        let settled = !command
            .as_ref()
            .is_some_and(|command| command.state.is_active());
        state.last_reading = reading.map(|mut reading| {
            // Readings lag a just-completed command; fold its value in.
            if let Some(merged) = merged.filter(|_| settled) {
                reading.value = merged;
            }
            reading
        });
        state.last_command = command;
        true
    }

    /// Starts polling after [`DEFAULT_START_DELAY`]. Must be called from
    /// within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        self.start_with_delay(DEFAULT_START_DELAY);
    }

    pub fn start_with_delay(self: &Arc<Self>, delay: Duration) {
        let mut state = self.inner.lock();
        if state.poll_timer.is_some() {
            return;
        }
        info!(
            device_id = %self.device_id,
            control_id = %self.control_id,
            delay_ms = delay.as_millis() as u64,
            "toggler: polling started"
        );
        state.poll_timer = Some(self.schedule(delay));
    }

    /// Stops scheduling further refreshes. A refresh already in flight still
    /// completes but does not schedule another.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.lock().poll_timer.take() {
            timer.abort();
            info!(
                device_id = %self.device_id,
                control_id = %self.control_id,
                "toggler: polling stopped"
            );
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock().poll_timer.is_some()
    }

    fn reschedule(self: &Arc<Self>, state: &mut TogglerState) {
        if state.poll_timer.is_none() {
            return;
        }
        let next = self.schedule(state.current_refresh());
        if let Some(previous) = state.poll_timer.replace(next) {
            previous.abort();
        }
    }

    fn schedule(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let toggler = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(toggler) = toggler.upgrade() else {
                return;
            };
            // Detached so that aborting this timer never cancels the refresh.
            tokio::spawn(async move {
                if let Err(err) = toggler.update().await {
                    debug!(
                        device_id = %toggler.device_id,
                        control_id = %toggler.control_id,
                        "toggler: scheduled refresh failed: {err}"
                    );
                }
            });
        })
    }

    fn notify(&self, error: Option<&ApiError>) {
        let observer = self.observer.read().clone();
        let Some(observer) = observer else {
            return;
        };
        if let Err(err) = observer.on_change(self, error) {
            warn!(
                device_id = %self.device_id,
                control_id = %self.control_id,
                "toggler: observer failed: {err:#}"
            );
        }
    }
}

impl Drop for ControlToggler {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.get_mut().poll_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/toggler_tests.rs"]
mod tests;
