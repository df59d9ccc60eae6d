use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::{
    model::enrichment::EnrichmentResult,
    pipeline::traits::{EnrichmentEngine, EnrichmentRequest},
    rate_limiters::RateLimiters,
    server_config::{ApiConfig, ModelConfig},
    HttpClient,
};

use super::{
    enrichment_user_prompt, parse_enrichment_answer, ChatApiResponseOrError,
    ENRICHMENT_SYSTEM_PROMPT,
};

/// Enrichment backed by an OpenAI-compatible chat completions endpoint in
/// JSON-object mode
#[derive(Clone)]
pub struct ChatEnrichmentEngine {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: String,
    api_key: String,
    model: ModelConfig,
}

impl ChatEnrichmentEngine {
    pub fn new(
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        api: &ApiConfig,
        model: &ModelConfig,
    ) -> Self {
        Self {
            http_client,
            rate_limiters,
            endpoint: api.endpoint.clone(),
            api_key: api.key.clone(),
            model: model.clone(),
        }
    }

    fn request_body(&self, request: &EnrichmentRequest) -> serde_json::Value {
        let user_content = enrichment_user_prompt(
            &request.subject,
            &request.snippet,
            &request.body,
            self.model.max_body_chars,
        );

        json!(
          {
            "model": &self.model.id,
            "temperature": self.model.temperature,
            "messages": [
              {
                "role": "system",
                "content": ENRICHMENT_SYSTEM_PROMPT
              },
              {
                "role": "user",
                "content": user_content
              }
            ],
            "response_format": {
                "type": "json_object",
            }
          }
        )
    }
}

#[async_trait]
impl EnrichmentEngine for ChatEnrichmentEngine {
    async fn ready(&self) {
        self.rate_limiters.wait_for_backoff().await;
    }

    async fn analyze(&self, request: &EnrichmentRequest) -> anyhow::Result<EnrichmentResult> {
        if self.api_key.is_empty() {
            bail!("ENRICHMENT_API_KEY is not set");
        }

        self.rate_limiters.acquire_prompt().await;

        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .context("Chat API request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.trigger_backoff();
            tracing::warn!("Chat API rate limited: {}", self.rate_limiters.get_status());
        }

        let resp = resp
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("Chat API returned a non-JSON body ({status})"))?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .context(format!("Could not parse chat response: {}", resp))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(error) => {
                if error.is_rate_limit() {
                    self.rate_limiters.trigger_backoff();
                }
                return Err(anyhow!("Chat API error ({status}): {}", error.error.message));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        if let Some(usage) = &parsed.usage {
            tracing::debug!("Chat API usage: {} tokens", usage.total_tokens);
        }

        let choice = parsed.choices.first().context("No choices in response")?;
        parse_enrichment_answer(&choice.message.content)
    }
}
