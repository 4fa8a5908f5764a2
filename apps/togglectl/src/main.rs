mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::{ControlId, ControlValue, DeviceId};
use toggler_core::{ApiError, ControlToggler, HttpApi};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(about = "Read and drive one remote device control")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Refresh once and print the current value.
    Get,
    /// Drive the control to VALUE.
    Set { value: String },
    /// Poll and print every change until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let settings = load_settings()?;
    settings.validate()?;
    let toggler = build_toggler(&settings)?;

    match args.command {
        Cmd::Get => {
            toggler.update().await?;
            println!("{}", describe(&toggler));
        }
        Cmd::Set { value } => {
            toggler.update().await?;
            let desired = ControlValue::parse_loose(&value);
            match toggler.set_value(desired.clone()).await? {
                Some(command) => println!(
                    "command {} ({}) requests {}={desired}",
                    command.id,
                    command.state,
                    toggler.control_id()
                ),
                None => println!("{} already reports {desired}", toggler.control_id()),
            }
        }
        Cmd::Watch => {
            toggler.set_observer(
                |toggler: &ControlToggler, error: Option<&ApiError>| -> anyhow::Result<()> {
                    match error {
                        Some(err) => println!("refresh failed: {err}"),
                        None => println!("{}", describe(toggler)),
                    }
                    Ok(())
                },
            );
            toggler.start();
            info!(
                device_id = %toggler.device_id(),
                control_id = %toggler.control_id(),
                "togglectl: watching, press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            toggler.stop();
        }
    }

    Ok(())
}

fn build_toggler(settings: &Settings) -> Result<Arc<ControlToggler>> {
    let device_id = DeviceId::new(settings.device_id.trim());
    let control_id = ControlId::new(settings.control_id.trim());
    let commands = Arc::new(HttpApi::with_timeout(
        &settings.api_url,
        settings.command_credentials(),
        settings.request_timeout(),
    )?);

    let toggler = if settings.uses_separate_reading_api() {
        let reading_url = settings
            .reading_api_url
            .as_deref()
            .unwrap_or(&settings.api_url);
        let readings = Arc::new(HttpApi::with_timeout(
            reading_url,
            settings.reading_credentials(),
            settings.request_timeout(),
        )?);
        ControlToggler::new_with_reading_source(commands, readings, device_id, control_id)
    } else {
        ControlToggler::new(commands, device_id, control_id)
    };

    toggler.set_refresh_interval(settings.refresh_interval());
    toggler.set_pending_refresh_interval(settings.pending_refresh_interval());
    Ok(toggler)
}

fn describe(toggler: &ControlToggler) -> String {
    let value = toggler
        .value()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "unknown".into());
    let pending = match toggler.last_command() {
        Some(command) if command.state.is_active() => format!(
            " (command {} {}, wants {})",
            command.id,
            command.state,
            command
                .requested_value()
                .map(|value| value.to_string())
                .unwrap_or_default()
        ),
        _ => String::new(),
    };
    format!("{}={value}{pending}", toggler.control_id())
}
