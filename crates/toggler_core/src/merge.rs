//! Deciding the authoritative control value from the two polled signals.

use shared::domain::{Command, CommandState, ControlId, ControlReading, ControlValue};

/// Picks the value that best reflects the control right now.
///
/// A declined (or absent) command never contributes. Otherwise the newer of
/// reading and command wins, and the command wins a timestamp tie because the
/// reading endpoint reports with coarser granularity.
pub fn merge_value(
    reading: Option<&ControlReading>,
    command: Option<&Command>,
) -> Option<ControlValue> {
    let command = command.filter(|command| command.state != CommandState::Declined);
    match (reading, command) {
        (reading, None) => reading.map(|reading| reading.value.clone()),
        (None, Some(command)) => command.requested_value().cloned(),
        (Some(reading), Some(command)) if reading.created_at > command.created_at => {
            Some(reading.value.clone())
        }
        (Some(_), Some(command)) => command.requested_value().cloned(),
    }
}

/// The newest set-control-parameter command aimed at `control_id`.
///
/// Ties on `created_at` resolve to the last matching entry in `commands`.
pub fn select_active_command<'a>(
    commands: &'a [Command],
    control_id: &ControlId,
) -> Option<&'a Command> {
    commands
        .iter()
        .filter(|command| command.is_set_control_parameter() && command.targets(control_id))
        .max_by_key(|command| command.created_at)
}

/// The newest reading reported for `control_id`.
pub fn select_reading<'a>(
    readings: &'a [ControlReading],
    control_id: &ControlId,
) -> Option<&'a ControlReading> {
    readings
        .iter()
        .filter(|reading| &reading.source_id == control_id)
        .max_by_key(|reading| reading.created_at)
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
