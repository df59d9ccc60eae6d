//! Contracts for the collaborators the pipeline drives.
//!
//! Real implementations live in `email::client` (Gmail), `prompt::enrichment`
//! (chat completions) and `model::email_summary` (Postgres). Tests use the
//! recording fakes in `testing::fakes`.

use async_trait::async_trait;
use derive_more::derive::Display;

use crate::model::enrichment::EnrichmentResult;

#[derive(Debug, Display)]
pub enum ProviderError {
    #[display("message not found: {_0}")]
    NotFound(String),
    #[display("mail provider rejected credentials: {_0}")]
    Unauthorized(String),
    #[display("mail provider error: {_0}")]
    Upstream(anyhow::Error),
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        ProviderError::Upstream(error.into())
    }
}

impl ProviderError {
    /// Error code surfaced to streaming consumers
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "not_found",
            ProviderError::Unauthorized(_) => "auth_error",
            ProviderError::Upstream(_) => "provider_error",
        }
    }
}

/// Content of one message, reduced to what the engine reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub user_id: i32,
    pub subject: String,
    pub snippet: String,
    pub body: String,
}

impl EnrichmentRequest {
    pub fn for_message(user_id: i32, message: FetchedMessage) -> Self {
        Self {
            user_id,
            subject: message.subject,
            snippet: message.snippet,
            body: message.body,
        }
    }
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of messages matching `query`, newest first. An empty list is not an error.
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, ProviderError>;

    async fn fetch(&self, message_id: &str) -> Result<FetchedMessage, ProviderError>;
}

#[async_trait]
pub trait EnrichmentEngine: Send + Sync {
    /// Resolves when the engine can take a call without stalling, e.g. once
    /// an upstream rate-limit backoff is over. Workers wait here before they
    /// take a throttle permit.
    async fn ready(&self) {}

    async fn analyze(&self, request: &EnrichmentRequest) -> anyhow::Result<EnrichmentResult>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, message_id: &str) -> anyhow::Result<Option<EnrichmentResult>>;

    async fn put(
        &self,
        user_id: i32,
        message_id: &str,
        result: &EnrichmentResult,
    ) -> anyhow::Result<()>;

    /// Stored results for a user, newest first, optionally filtered by a
    /// case-insensitive substring of summary, category or company.
    async fn list_for_user(
        &self,
        user_id: i32,
        query: Option<&str>,
        limit: u64,
    ) -> anyhow::Result<Vec<(String, EnrichmentResult)>>;
}
