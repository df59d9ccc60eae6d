use anyhow::anyhow;
use async_trait::async_trait;
use google_gmail1::api::{ListMessagesResponse, Message};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::{
    pipeline::traits::{FetchedMessage, MailProvider, ProviderError},
    rate_limiters::RateLimiters,
    server_config::GmailConfig,
    HttpClient,
};

use super::parsed_message::ParsedMessage;

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

macro_rules! gmail_url {
    ($base:expr, $($params:expr),*) => {
        {
            let list_params: Vec<&str> = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", $base, path)
        }
    };
}

const MAX_RETRIES: u32 = 3;

/// Gmail REST client for one user's access token
#[derive(Clone)]
pub struct GmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiters: RateLimiters,
    config: GmailConfig,
}

impl GmailClient {
    pub fn new(
        http_client: HttpClient,
        access_token: String,
        rate_limiters: RateLimiters,
        config: GmailConfig,
    ) -> Self {
        Self {
            http_client,
            access_token,
            rate_limiters,
            config,
        }
    }

    /// Send, retrying rate-limited and 5xx responses with exponential backoff: 1s, 2s, 4s
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry_count = 0;
        loop {
            let resp = build().bearer_auth(&self.access_token).send().await?;
            let status = resp.status();
            let retryable =
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

            if !retryable || retry_count >= MAX_RETRIES {
                return Ok(resp);
            }

            retry_count += 1;
            let delay = Duration::from_secs(1 << (retry_count - 1));
            tracing::info!(
                "Gmail returned {}, retrying after {:?} (attempt {}/{})",
                status,
                delay,
                retry_count,
                MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn get_message_by_id(&self, message_id: &str) -> Result<Message, ProviderError> {
        self.rate_limiters
            .acquire_gmail(self.config.messages_get_cost)
            .await;

        let url = gmail_url!(self.config.base_url, "messages", message_id);
        let resp = self
            .send_with_retry(|| self.http_client.get(&url).query(&[("format", "RAW")]))
            .await?;

        let resp = error_for_status(resp, message_id).await?;
        Ok(resp.json::<Message>().await?)
    }
}

/// Map Gmail error statuses onto the provider error kinds the pipeline reports
async fn error_for_status(resp: Response, message_id: &str) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<GmailApiError>().await {
        Ok(e) => e.error.message,
        Err(_) => status.to_string(),
    };

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message_id.to_string()),
        _ => ProviderError::Upstream(anyhow!("Gmail API error {}: {}", status, message)),
    })
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, ProviderError> {
        self.rate_limiters
            .acquire_gmail(self.config.messages_list_cost)
            .await;

        let url = gmail_url!(self.config.base_url, "messages");
        let params = [
            ("q".to_string(), query.to_string()),
            ("maxResults".to_string(), max_results.to_string()),
        ];
        let resp = self
            .send_with_retry(|| self.http_client.get(&url).query(&params))
            .await?;

        let data = error_for_status(resp, "")
            .await?
            .json::<ListMessagesResponse>()
            .await?;

        Ok(data
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect())
    }

    async fn fetch(&self, message_id: &str) -> Result<FetchedMessage, ProviderError> {
        let message = self.get_message_by_id(message_id).await?;
        let parsed = ParsedMessage::from_gmail_message(message).map_err(ProviderError::Upstream)?;
        Ok(parsed.into())
    }
}
