//! Axum HTTP handlers for the control API

use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    errors::AppError,
    history::log_files::read_history,
    monitor::model::{HistoryEntry, MonitorSnapshot, ALL_DATES, DEFAULT_INTERVAL_SECONDS, MIN_INTERVAL_SECONDS},
    settings::{load_settings, save_settings, split_list, MonitorSettings, NotificationSettings},
    AppState,
};

pub const TEST_NOTIFICATION_TITLE: &str = "Test notification";
pub const TEST_NOTIFICATION_BODY: &str = "This is a test notification from the availability monitor.";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct DatesResponse {
    pub dates: Vec<String>,
}

/// Dates arrive either as a JSON list or as the raw text of a form field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListInput {
    List(Vec<String>),
    Text(String),
}

impl ListInput {
    fn into_items(self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .iter()
                .flat_map(|item| split_list(item))
                .collect(),
            Self::Text(text) => split_list(&text),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub check_dates: Option<ListInput>,
    pub monitor_all: bool,
    pub interval_seconds: Option<Value>,
    pub notify_on_available: bool,
    pub mail_host: Option<String>,
    pub mail_port: Option<Value>,
    pub mail_user: Option<String>,
    pub mail_pass: Option<String>,
    pub sender: Option<String>,
    pub receivers: Option<ListInput>,
}

impl ConfigUpdate {
    /// Explicit dates win; `monitor_all` only applies when none were given.
    pub fn check_dates(&mut self) -> Vec<String> {
        let dates = self
            .check_dates
            .take()
            .map(ListInput::into_items)
            .unwrap_or_default();

        if dates.is_empty() && self.monitor_all {
            vec![ALL_DATES.to_string()]
        } else {
            dates
        }
    }

    pub fn interval_seconds(&self) -> u64 {
        parse_interval(self.interval_seconds.as_ref())
    }

    /// Replaces the mail fields that are present in the request. A mail port
    /// that is blank or not a port number switches back to auto detection.
    pub fn apply_notification(&mut self, notification: &mut NotificationSettings) {
        if let Some(host) = self.mail_host.take() {
            notification.mail_host = host.trim().to_string();
        }
        if let Some(port) = self.mail_port.take() {
            notification.mail_port = parse_mail_port(&port);
        }
        if let Some(user) = self.mail_user.take() {
            notification.mail_user = user.trim().to_string();
        }
        if let Some(pass) = self.mail_pass.take() {
            notification.mail_pass = pass.trim().to_string();
        }
        if let Some(sender) = self.sender.take() {
            notification.sender = sender.trim().to_string();
        }
        if let Some(receivers) = self.receivers.take() {
            notification.receivers = receivers.into_items();
        }
    }
}

fn parse_mail_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
        Value::String(text) => text.trim().parse::<u16>().ok(),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Unparseable input falls back to the default; anything below the minimum
/// is raised to it.
pub fn parse_interval(value: Option<&Value>) -> u64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    match parsed {
        Some(seconds) if seconds < MIN_INTERVAL_SECONDS as i64 => MIN_INTERVAL_SECONDS,
        Some(seconds) => seconds as u64,
        None => DEFAULT_INTERVAL_SECONDS,
    }
}

pub fn upcoming_dates(from: NaiveDate, days: u64) -> Vec<String> {
    (0..days)
        .filter_map(|offset| from.checked_add_days(Days::new(offset)))
        .map(|date| date.format("%Y%m%d").to_string())
        .collect()
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn status(State(state): State<AppState>) -> Json<MonitorSnapshot> {
    Json(state.monitor.snapshot())
}

pub async fn start(State(state): State<AppState>) -> Json<MonitorSnapshot> {
    state.monitor.start();
    Json(state.monitor.snapshot())
}

pub async fn stop(State(state): State<AppState>) -> Json<MonitorSnapshot> {
    state.monitor.stop();
    Json(state.monitor.snapshot())
}

pub async fn update_config(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MonitorSnapshot>, AppError> {
    let mut update: ConfigUpdate = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request("invalid_config", err.to_string()))?;

    let monitor = MonitorSettings {
        check_dates: update.check_dates(),
        interval_seconds: update.interval_seconds(),
        notify_on_available: update.notify_on_available,
    };

    let mut settings = load_settings(&state.settings).await;
    settings.monitor = monitor.clone();
    update.apply_notification(&mut settings.notification);
    save_settings(&state.settings, settings)
        .await
        .map_err(|err| AppError::internal(format!("failed to persist settings: {err}")))?;

    state.monitor.update_config(monitor.to_config());
    info!(
        check_dates = ?monitor.check_dates,
        interval_seconds = monitor.interval_seconds,
        "monitor configuration saved"
    );

    Ok(Json(state.monitor.snapshot()))
}

/// Full history replayed from the cycle log, most recent first.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let mut entries = read_history(&state.log_dir)
        .await
        .map_err(|err| AppError::internal(format!("failed to read cycle log: {err}")))?;

    entries.reverse();
    if let Some(limit) = query.limit {
        entries.truncate(limit);
    }
    Ok(Json(entries))
}

pub async fn test_notification(State(state): State<AppState>) -> Json<DeliveryResponse> {
    let delivered = state
        .notifier
        .notify(TEST_NOTIFICATION_TITLE, TEST_NOTIFICATION_BODY)
        .await;
    Json(DeliveryResponse { delivered })
}

pub async fn next_seven_days() -> Json<DatesResponse> {
    Json(DatesResponse {
        dates: upcoming_dates(Local::now().date_naive(), 7),
    })
}
