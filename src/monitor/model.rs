//! Value types shared by the poll loop, the status API and history replay.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

/// Live history kept in memory; older entries are only recoverable from the
/// cycle log.
pub const HISTORY_CAPACITY: usize = 200;
pub const MIN_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const ALL_DATES: &str = "all";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which date-keys of the availability document are of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFilter {
    All,
    Only(Vec<String>),
}

impl DateFilter {
    /// Builds a filter from configured keys; any `"all"` entry selects every date.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.iter().any(|key| key == ALL_DATES) {
            Self::All
        } else {
            Self::Only(keys)
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(keys) => keys.iter().any(|candidate| candidate == key),
        }
    }

    pub fn to_keys(&self) -> Vec<String> {
        match self {
            Self::All => vec![ALL_DATES.to_string()],
            Self::Only(keys) => keys.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub filter: DateFilter,
    pub interval_seconds: u64,
    pub notify_on_available: bool,
}

impl MonitorConfig {
    pub fn new(filter: DateFilter, interval_seconds: u64, notify_on_available: bool) -> Self {
        Self {
            filter,
            interval_seconds: interval_seconds.max(MIN_INTERVAL_SECONDS),
            notify_on_available,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Serialize)]
struct MonitorConfigView {
    check_dates: Vec<String>,
    interval_seconds: u64,
    notify_on_available: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    monitor_all: bool,
}

impl Serialize for MonitorConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MonitorConfigView {
            check_dates: self.filter.to_keys(),
            interval_seconds: self.interval_seconds,
            notify_on_available: self.notify_on_available,
            monitor_all: matches!(self.filter, DateFilter::All),
        }
        .serialize(serializer)
    }
}

/// Outcome of one poll cycle, live or replayed from the cycle log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    #[serde(serialize_with = "serialize_timestamp")]
    pub checked_at: NaiveDateTime,
    pub available_count: Option<usize>,
    pub available_dates: Vec<String>,
    pub provider_code: Option<String>,
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn success(
        checked_at: NaiveDateTime,
        available_count: usize,
        available_dates: Vec<String>,
        provider_code: Option<String>,
    ) -> Self {
        Self {
            checked_at,
            available_count: Some(available_count),
            available_dates,
            provider_code,
            error: None,
        }
    }

    pub fn failure(checked_at: NaiveDateTime, error: impl Into<String>) -> Self {
        Self {
            checked_at,
            available_count: None,
            available_dates: Vec::new(),
            provider_code: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.available_count.is_none()
    }
}

/// Point-in-time copy of the monitor's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub running: bool,
    pub config: MonitorConfig,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub last_checked_at: Option<NaiveDateTime>,
    pub last_available_count: usize,
    pub last_available_dates: Vec<String>,
    pub last_provider_code: Option<String>,
    pub last_error: Option<String>,
    pub history: Vec<HistoryEntry>,
}

fn serialize_timestamp<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
}

fn serialize_optional_timestamp<S: Serializer>(
    value: &Option<NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serialize_timestamp(value, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 12)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .expect("valid timestamp")
    }

    #[test]
    fn filter_with_all_sentinel_matches_everything() {
        let filter = DateFilter::from_keys(["20260213", "all"]);
        assert_eq!(filter, DateFilter::All);
        assert!(filter.matches("20991231"));
        assert_eq!(filter.to_keys(), vec!["all".to_string()]);
    }

    #[test]
    fn explicit_filter_matches_members_only() {
        let filter = DateFilter::from_keys(["20260213", "20260214"]);
        assert!(filter.matches("20260214"));
        assert!(!filter.matches("20260215"));
    }

    #[test]
    fn interval_is_floor_clamped() {
        let config = MonitorConfig::new(DateFilter::All, 3, true);
        assert_eq!(config.interval_seconds, MIN_INTERVAL_SECONDS);

        let config = MonitorConfig::new(DateFilter::All, 90, true);
        assert_eq!(config.interval(), Duration::from_secs(90));
    }

    #[test]
    fn history_entry_serializes_timestamp_in_log_format() {
        let entry = HistoryEntry::failure(at(11, 15, 35), "timeout");
        let value = serde_json::to_value(&entry).expect("serializable entry");

        assert_eq!(value["checked_at"], json!("2026-02-12 11:15:35"));
        assert!(value["available_count"].is_null());
        assert_eq!(value["error"], json!("timeout"));
        assert!(entry.is_error());
    }

    #[test]
    fn config_serializes_as_check_dates_list() {
        let config = MonitorConfig::new(DateFilter::from_keys(["20260213"]), 60, false);
        let value = serde_json::to_value(&config).expect("serializable config");

        assert_eq!(value["check_dates"], json!(["20260213"]));
        assert_eq!(value["interval_seconds"], json!(60));
        assert_eq!(value["notify_on_available"], json!(false));
        assert!(value.get("monitor_all").is_none());
    }
}
