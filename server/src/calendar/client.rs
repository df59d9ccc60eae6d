use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};

use crate::{
    email::client::GmailApiError, pipeline::traits::ProviderError,
    server_config::CalendarConfig, HttpClient,
};

use super::{CalendarEvent, CalendarProvider, EventList, EventWindow};

/// Calendar REST client for one user's Google access token
#[derive(Clone)]
pub struct CalendarClient {
    http_client: HttpClient,
    access_token: String,
    config: CalendarConfig,
}

impl CalendarClient {
    pub fn new(http_client: HttpClient, access_token: String, config: CalendarConfig) -> Self {
        Self {
            http_client,
            access_token,
            config,
        }
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.config.base_url, event_id)
    }
}

/// Calendar shares Gmail's error envelope
async fn error_for_status(resp: Response, event_id: &str) -> Result<Response, ProviderError> {
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
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::NotFound(event_id.to_string()),
        _ => ProviderError::Upstream(anyhow!("Calendar API error {}: {}", status, message)),
    })
}

#[async_trait]
impl CalendarProvider for CalendarClient {
    async fn insert(&self, event: CalendarEvent) -> Result<CalendarEvent, ProviderError> {
        let resp = self
            .http_client
            .post(&self.config.base_url)
            .bearer_auth(&self.access_token)
            .json(&event)
            .send()
            .await?;

        Ok(error_for_status(resp, "").await?.json().await?)
    }

    async fn delete(&self, event_id: &str) -> Result<(), ProviderError> {
        let resp = self
            .http_client
            .delete(self.event_url(event_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        error_for_status(resp, event_id).await?;
        Ok(())
    }

    async fn list(&self, window: &EventWindow) -> Result<Vec<CalendarEvent>, ProviderError> {
        let params = [
            ("timeMin", window.time_min.clone()),
            ("timeMax", window.time_max.clone()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", window.max_results.to_string()),
        ];
        let resp = self
            .http_client
            .get(&self.config.base_url)
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()
            .await?;

        let list: EventList = error_for_status(resp, "").await?.json().await?;
        Ok(list.items)
    }
}
