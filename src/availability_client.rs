use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};

use crate::{errors::FetchError, monitor::availability::AvailabilityDocument};

pub const DEFAULT_AVAILABILITY_URL: &str =
    "https://transaction.bochk.com/whk/form/openAccount/jsonAvailableDateAndTime.action";

const FORM_BODY: &str = "bean.appDate=";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/81.0.4044.138 Safari/537.36";

/// Source of availability documents.
#[async_trait]
pub trait AvailabilityFetcher: Send + Sync {
    async fn fetch(&self) -> Result<AvailabilityDocument, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpAvailabilityClient {
    client: Client,
    url: String,
}

impl HttpAvailabilityClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| FetchError::Transport(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AvailabilityFetcher for HttpAvailabilityClient {
    async fn fetch(&self) -> Result<AvailabilityDocument, FetchError> {
        let response = self
            .client
            .post(&self.url)
            .header(header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=UTF-8",
            )
            .header("X-Requested-With", "XMLHttpRequest")
            .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7")
            .body(FORM_BODY)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetchError::Transport("availability request timed out".to_string())
                } else {
                    FetchError::Transport(format!("availability request failed: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!(
                "availability endpoint returned {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(format!("failed to read response body: {err}")))?;

        AvailabilityDocument::from_json(&body)
    }
}
