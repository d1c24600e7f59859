use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::availability_client::DEFAULT_AVAILABILITY_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub availability_url: String,
    pub fetch_timeout: Duration,
    pub resend_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub autostart: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MONITOR_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("FETCH_TIMEOUT_SECS must be a positive number of seconds")]
    InvalidFetchTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_token = non_empty("MONITOR_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(5000);

        let fetch_timeout = non_empty("FETCH_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::InvalidFetchTimeout)
            })
            .transpose()?
            .unwrap_or(30);

        let autostart = non_empty("MONITOR_AUTOSTART").map_or(true, |value| {
            !matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no")
        });

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            config_file: non_empty("CONFIG_FILE")
                .map_or_else(|| PathBuf::from("config/config.json"), PathBuf::from),
            log_dir: non_empty("LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from),
            availability_url: non_empty("AVAILABILITY_URL")
                .unwrap_or_else(|| DEFAULT_AVAILABILITY_URL.to_string()),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            resend_api_key: non_empty("RESEND_API_KEY"),
            webhook_url: non_empty("NOTIFY_WEBHOOK_URL"),
            autostart,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
