//! Notification delivery with provider fallback
//!
//! The poll loop only sees [`Notifier::notify`], which reports delivery as a
//! plain `bool`. Provider failures are logged and collapsed here.
//!
//! The usual chain is SMTP with the configured mail account, then the Resend
//! HTTP API, then a generic webhook.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::settings::{load_settings, NotificationSettings, SettingsStore};

pub const RESEND_API_URL: &str = "https://api.resend.com/emails";
const RESEND_DEFAULT_SENDER: &str = "onboarding@resend.dev";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const SMTP_IMPLICIT_TLS_PORT: u16 = 465;
pub const SMTP_STARTTLS_PORT: u16 = 587;

/// Known mail hosts with their implicit TLS and STARTTLS ports.
const KNOWN_SMTP_HOSTS: [(&str, u16, u16); 5] = [
    ("smtp.qq.com", 465, 587),
    ("smtp.163.com", 465, 25),
    ("smtp.gmail.com", 465, 587),
    ("smtp.office365.com", 465, 587),
    ("smtp-mail.outlook.com", 465, 587),
];

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns `true` only on confirmed delivery.
    async fn notify(&self, title: &str, body: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("provider is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider rejected the message with status {0}")]
    Rejected(u16),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

fn http_client() -> Result<Client, NotifyError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| NotifyError::Transport(format!("failed to build http client: {err}")))
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Tries each provider in order and stops at the first delivery.
#[derive(Clone, Default)]
pub struct FallbackNotifier {
    providers: Vec<Arc<dyn NotificationProvider>>,
}

impl FallbackNotifier {
    pub fn new(providers: Vec<Arc<dyn NotificationProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }
}

#[async_trait]
impl Notifier for FallbackNotifier {
    async fn notify(&self, title: &str, body: &str) -> bool {
        for provider in &self.providers {
            match provider.send(title, body).await {
                Ok(()) => {
                    info!(provider = provider.name(), "notification delivered");
                    return true;
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "notification provider failed");
                }
            }
        }

        if self.providers.is_empty() {
            warn!("no notification providers configured");
        }
        false
    }
}

/// Email through the Resend HTTP API. Sender and receivers are read from the
/// settings store on every send so that updates apply immediately.
pub struct ResendNotifier {
    client: Client,
    api_url: String,
    api_key: String,
    settings: Arc<dyn SettingsStore>,
}

impl ResendNotifier {
    pub fn new(
        api_key: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, NotifyError> {
        Self::with_api_url(RESEND_API_URL, api_key, settings)
    }

    pub fn with_api_url(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client()?,
            api_url: api_url.into(),
            api_key: api_key.into(),
            settings,
        })
    }
}

#[async_trait]
impl NotificationProvider for ResendNotifier {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        if self.api_key.trim().is_empty() {
            return Err(NotifyError::NotConfigured("missing api key"));
        }

        let notification = load_settings(&self.settings).await.notification;
        if notification.receivers.is_empty() {
            return Err(NotifyError::NotConfigured("no receivers"));
        }
        let sender = if notification.sender.trim().is_empty() {
            RESEND_DEFAULT_SENDER.to_string()
        } else {
            notification.sender
        };

        let html = format!("<p>{}</p>", body.replace('\n', "<br>"));
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": sender,
                "to": notification.receivers,
                "subject": title,
                "html": html,
            }))
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        check_status(response.status())
    }
}

/// JSON `{title, content}` POST to an arbitrary webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationProvider for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "title": title, "content": body }))
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        check_status(response.status())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    ImplicitTls,
    StartTls,
}

/// Port used when none is configured. Outlook and Office365 want STARTTLS,
/// other known hosts implicit TLS, unknown hosts 465.
pub fn smtp_port_for(host: &str) -> u16 {
    let host = host.trim().to_ascii_lowercase();
    let Some((_, tls_port, starttls_port)) = KNOWN_SMTP_HOSTS
        .iter()
        .find(|(known, _, _)| *known == host)
    else {
        return SMTP_IMPLICIT_TLS_PORT;
    };

    if host.contains("outlook") || host.contains("office365") {
        *starttls_port
    } else {
        *tls_port
    }
}

pub fn smtp_security_for(port: u16) -> SmtpSecurity {
    if port == SMTP_STARTTLS_PORT {
        SmtpSecurity::StartTls
    } else {
        SmtpSecurity::ImplicitTls
    }
}

/// Plain-text email through the configured SMTP account. The account is
/// read from the settings store on every send.
pub struct SmtpNotifier {
    settings: Arc<dyn SettingsStore>,
}

impl SmtpNotifier {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }
}

fn build_message(
    notification: &NotificationSettings,
    title: &str,
    body: &str,
) -> Result<Message, NotifyError> {
    let invalid = |err: &dyn std::fmt::Display| NotifyError::InvalidMessage(err.to_string());

    let from: Mailbox = notification.sender.trim().parse().map_err(|err| invalid(&err))?;
    let mut builder = Message::builder()
        .from(from)
        .subject(title)
        .header(ContentType::TEXT_PLAIN);
    for receiver in &notification.receivers {
        builder = builder.to(receiver.trim().parse().map_err(|err| invalid(&err))?);
    }
    builder.body(body.to_string()).map_err(|err| invalid(&err))
}

#[async_trait]
impl NotificationProvider for SmtpNotifier {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let notification = load_settings(&self.settings).await.notification;
        if notification.mail_user.trim().is_empty()
            || notification.mail_pass.is_empty()
            || notification.sender.trim().is_empty()
            || notification.receivers.is_empty()
        {
            return Err(NotifyError::NotConfigured("incomplete mail account"));
        }

        let message = build_message(&notification, title, body)?;
        let host = notification.mail_host.trim();
        let port = notification
            .mail_port
            .unwrap_or_else(|| smtp_port_for(host));
        let security = smtp_security_for(port);
        debug!(host, port, ?security, "connecting to smtp server");

        let builder = match security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
        }
        .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let transport = builder
            .port(port)
            .credentials(Credentials::new(
                notification.mail_user.trim().to_string(),
                notification.mail_pass.clone(),
            ))
            .timeout(Some(REQUEST_TIMEOUT))
            .build();

        transport
            .send(message)
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        Ok(())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), NotifyError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Rejected(status.as_u16()))
    }
}
