use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use toggler_core::{
    transport::DEFAULT_REQUEST_TIMEOUT, Credentials, DEFAULT_PENDING_REFRESH_INTERVAL,
    DEFAULT_REFRESH_INTERVAL,
};

pub const SETTINGS_FILE: &str = "togglectl.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub reading_api_url: Option<String>,
    pub api_key: String,
    pub api_secret: String,
    pub reading_api_key: Option<String>,
    pub reading_api_secret: Option<String>,
    pub device_id: String,
    pub control_id: String,
    pub refresh_seconds: u64,
    pub pending_refresh_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080/api".into(),
            reading_api_url: None,
            api_key: String::new(),
            api_secret: String::new(),
            reading_api_key: None,
            reading_api_secret: None,
            device_id: String::new(),
            control_id: String::new(),
            refresh_seconds: DEFAULT_REFRESH_INTERVAL.as_secs(),
            pending_refresh_seconds: DEFAULT_PENDING_REFRESH_INTERVAL.as_secs(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds.max(1))
    }

    pub fn pending_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.pending_refresh_seconds.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn command_credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    /// Reading credentials fall back to the command credentials field by field.
    pub fn reading_credentials(&self) -> Credentials {
        Credentials::new(
            self.reading_api_key.clone().unwrap_or_else(|| self.api_key.clone()),
            self.reading_api_secret
                .clone()
                .unwrap_or_else(|| self.api_secret.clone()),
        )
    }

    pub fn uses_separate_reading_api(&self) -> bool {
        self.reading_api_url.is_some()
            || self.reading_api_key.is_some()
            || self.reading_api_secret.is_some()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device_id.trim().is_empty() {
            anyhow::bail!("device id is not configured (TOGGLER_DEVICE_ID)");
        }
        if self.control_id.trim().is_empty() {
            anyhow::bail!("control id is not configured (TOGGLER_CONTROL_ID)");
        }
        self.command_credentials()
            .validate()
            .context("command api credentials (TOGGLER_API_KEY, TOGGLER_API_SECRET)")?;
        self.reading_credentials().validate().context(
            "reading api credentials (TOGGLER_READING_API_KEY, TOGGLER_READING_API_SECRET)",
        )?;
        Ok(())
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg = toml::from_str::<HashMap<String, String>>(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        apply(&mut settings, |key| file_cfg.get(key).cloned())?;
    }

    apply(&mut settings, |key| {
        let key = key.to_ascii_uppercase();
        env(&format!("APP__{key}")).or_else(|| env(&format!("TOGGLER_{key}")))
    })?;

    Ok(settings)
}

fn apply(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(v) = lookup("api_url") {
        settings.api_url = v;
    }
    if let Some(v) = lookup("reading_api_url") {
        settings.reading_api_url = Some(v);
    }
    if let Some(v) = lookup("api_key") {
        settings.api_key = v;
    }
    if let Some(v) = lookup("api_secret") {
        settings.api_secret = v;
    }
    if let Some(v) = lookup("reading_api_key") {
        settings.reading_api_key = Some(v);
    }
    if let Some(v) = lookup("reading_api_secret") {
        settings.reading_api_secret = Some(v);
    }
    if let Some(v) = lookup("device_id") {
        settings.device_id = v;
    }
    if let Some(v) = lookup("control_id") {
        settings.control_id = v;
    }
    if let Some(v) = lookup("refresh_seconds") {
        settings.refresh_seconds = parse_seconds("refresh_seconds", &v)?;
    }
    if let Some(v) = lookup("pending_refresh_seconds") {
        settings.pending_refresh_seconds = parse_seconds("pending_refresh_seconds", &v)?;
    }
    if let Some(v) = lookup("request_timeout_seconds") {
        settings.request_timeout_seconds = parse_seconds("request_timeout_seconds", &v)?;
    }
    Ok(())
}

fn parse_seconds(key: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'"))
}
