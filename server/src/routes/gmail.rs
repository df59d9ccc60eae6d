use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{gmail_token::GmailAccessToken, jwt::Claims},
    error::AppJsonResult,
    model::enrichment::EnrichedEmail,
    pipeline::{adapter::CancelOnDrop, StreamEvent},
    server_config::cfg,
    ServerState,
};

/// Upper bound on stored summaries read for one listing request
const MAX_STORED: u64 = 500;
const EMAILS_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub query: Option<String>,
}

impl SyncQuery {
    fn resolve(self) -> String {
        self.query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| cfg.settings.default_email_query.clone())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub processed: usize,
    pub emails: Vec<EnrichedEmail>,
}

/// # GET /gmail/sync
///
/// Lists messages matching `query` (or the configured default), enriches them
/// and answers once every message has been handled.
pub async fn sync(
    claims: Claims,
    GmailAccessToken(token): GmailAccessToken,
    State(state): State<ServerState>,
    Query(query): Query<SyncQuery>,
) -> AppJsonResult<SyncResponse> {
    let query = query.resolve();
    let session = state.sync_session(claims.sub, token);

    // Client gone before the batch finished: stop the workers too
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = session.sync_batch(cancel, &query).await?;
    tracing::info!(
        "Email sync completed for user {}: {} processed",
        claims.sub,
        outcome.processed
    );

    Ok(Json(SyncResponse {
        success: true,
        processed: outcome.processed,
        emails: outcome.emails,
    }))
}

/// # GET /gmail/stream
///
/// Server-sent events: stored summaries first, then each new result as soon as
/// it is ready. Ends with `event: complete`. Closing the connection cancels
/// the run.
pub async fn stream(
    claims: Claims,
    GmailAccessToken(token): GmailAccessToken,
    State(state): State<ServerState>,
    Query(query): Query<SyncQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let query = query.resolve();
    let cancel = CancellationToken::new();
    let events = state
        .sync_session(claims.sub, token)
        .stream(cancel.clone(), query);

    let stream = CancelOnDrop::new(ReceiverStream::new(events), cancel).map(|e| Ok(to_sse_event(e)));

    Sse::new(stream)
}

fn to_sse_event(event: StreamEvent) -> Event {
    let built = match event {
        StreamEvent::Data(email) => Event::default().json_data(email),
        StreamEvent::Error { code, message } => Event::default()
            .event("error")
            .json_data(json!({ "error": code, "message": message })),
        StreamEvent::Heartbeat => Ok(Event::default().comment("heartbeat")),
        StreamEvent::Complete => Ok(Event::default()
            .event("complete")
            .data(r#"{"status":"done"}"#)),
    };

    built.unwrap_or_else(|e| {
        tracing::error!("Error serializing stream event: {:?}", e);
        Event::default().comment("serialization error")
    })
}

#[derive(Debug, Deserialize)]
pub struct EmailsQuery {
    pub q: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailsResponse {
    pub success: bool,
    pub emails: Vec<EnrichedEmail>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

/// # GET /gmail/emails
///
/// Stored summaries for the caller, newest first.
///
/// Query parameters:
/// - `q`: Optional case-insensitive filter on summary, category or company
/// - `page`: 1-based page number (default: 1)
pub async fn emails(
    claims: Claims,
    State(state): State<ServerState>,
    Query(query): Query<EmailsQuery>,
) -> AppJsonResult<EmailsResponse> {
    let page = query.page.filter(|p| *p > 0).unwrap_or(1);
    let stored = state
        .pipeline
        .store
        .list_for_user(claims.sub, query.q.as_deref(), MAX_STORED)
        .await?;

    let total = stored.len();
    let total_pages = total.div_ceil(EMAILS_PAGE_SIZE).max(1);
    let emails = stored
        .into_iter()
        .skip((page - 1) * EMAILS_PAGE_SIZE)
        .take(EMAILS_PAGE_SIZE)
        .map(|(message_id, result)| EnrichedEmail {
            message_id,
            from_cache: true,
            result,
        })
        .collect();

    Ok(Json(EmailsResponse {
        success: true,
        emails,
        total,
        page,
        total_pages,
    }))
}
