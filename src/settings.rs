//! Persisted monitor and notification settings
//!
//! Settings live in a JSON file. Every field has a default, so a partial file
//! is completed field by field, and a missing or unreadable file yields the
//! defaults. Environment overrides are applied on top of the file on every
//! load.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::monitor::model::{DateFilter, MonitorConfig, DEFAULT_INTERVAL_SECONDS};

pub const DEFAULT_CHECK_DATES: [&str; 3] = ["20260213", "20260214", "20260215"];
pub const DEFAULT_MAIL_HOST: &str = "smtp.qq.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub notification: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub check_dates: Vec<String>,
    pub interval_seconds: u64,
    pub notify_on_available: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_dates: DEFAULT_CHECK_DATES.iter().map(ToString::to_string).collect(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            notify_on_available: true,
        }
    }
}

impl MonitorSettings {
    pub fn to_config(&self) -> MonitorConfig {
        MonitorConfig::new(
            DateFilter::from_keys(self.check_dates.iter().cloned()),
            self.interval_seconds,
            self.notify_on_available,
        )
    }
}

/// Mail account and recipients. `mail_port: None` picks the port from the
/// host, see [`crate::notifier::smtp_port_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub mail_host: String,
    pub mail_port: Option<u16>,
    pub mail_user: String,
    pub mail_pass: String,
    pub sender: String,
    pub receivers: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            mail_host: DEFAULT_MAIL_HOST.to_string(),
            mail_port: None,
            mail_user: String::new(),
            mail_pass: String::new(),
            sender: String::new(),
            receivers: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait SettingsStore: Send + Sync {
    /// Never fails; falls back to defaults.
    fn load(&self) -> Settings;

    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Runs [`SettingsStore::load`] on the blocking pool.
pub async fn load_settings(store: &Arc<dyn SettingsStore>) -> Settings {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.load())
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "settings load task failed, using defaults");
            Settings::default()
        })
}

/// Runs [`SettingsStore::save`] on the blocking pool.
pub async fn save_settings(
    store: &Arc<dyn SettingsStore>,
    settings: Settings,
) -> Result<(), SettingsError> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.save(&settings)).await?
}

/// Values taken from the environment that win over the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub check_dates: Option<Vec<String>>,
    pub interval_seconds: Option<u64>,
    pub notify_on_available: Option<bool>,
    pub mail_host: Option<String>,
    pub mail_port: Option<u16>,
    pub mail_user: Option<String>,
    pub mail_pass: Option<String>,
    pub sender: Option<String>,
    pub receivers: Option<Vec<String>>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let monitor_all = non_empty("MONITOR_ALL_DATES").is_some_and(|value| is_truthy(&value));
        let check_dates = if monitor_all {
            Some(vec![crate::monitor::model::ALL_DATES.to_string()])
        } else {
            non_empty("MONITOR_CHECK_DATES")
                .map(|value| split_list(&value))
                .filter(|dates| !dates.is_empty())
        };

        let interval_seconds = non_empty("MONITOR_INTERVAL_SECONDS")
            .filter(|value| value.chars().all(|c| c.is_ascii_digit()))
            .and_then(|value| value.parse::<u64>().ok());

        Self {
            check_dates,
            interval_seconds,
            notify_on_available: non_empty("MONITOR_NOTIFY_ON_AVAILABLE")
                .map(|value| is_truthy(&value)),
            mail_host: non_empty("MAIL_HOST"),
            mail_port: non_empty("MAIL_PORT").and_then(|value| value.parse::<u16>().ok()),
            mail_user: non_empty("MAIL_USER"),
            mail_pass: non_empty("MAIL_PASS"),
            sender: non_empty("SENDER"),
            receivers: non_empty("RECEIVERS")
                .map(|value| split_list(&value))
                .filter(|receivers| !receivers.is_empty()),
        }
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(check_dates) = &self.check_dates {
            settings.monitor.check_dates = check_dates.clone();
        }
        if let Some(interval_seconds) = self.interval_seconds {
            settings.monitor.interval_seconds = interval_seconds;
        }
        if let Some(notify) = self.notify_on_available {
            settings.monitor.notify_on_available = notify;
        }
        if let Some(host) = &self.mail_host {
            settings.notification.mail_host = host.clone();
        }
        if let Some(port) = self.mail_port {
            settings.notification.mail_port = Some(port);
        }
        if let Some(user) = &self.mail_user {
            settings.notification.mail_user = user.clone();
        }
        if let Some(pass) = &self.mail_pass {
            settings.notification.mail_pass = pass.clone();
        }
        if let Some(sender) = &self.sender {
            settings.notification.sender = sender.clone();
        }
        if let Some(receivers) = &self.receivers {
            settings.notification.receivers = receivers.clone();
        }
    }
}

#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    overrides: EnvOverrides,
    lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>, overrides: EnvOverrides) -> Self {
        Self {
            path: path.into(),
            overrides,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<Option<Settings>, SettingsError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Settings {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut settings = match self.read_file() {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "falling back to default settings");
                Settings::default()
            }
        };
        self.overrides.apply(&mut settings);
        settings
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(settings)?;
        text.push('\n');
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

/// Splits comma or newline separated input, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
