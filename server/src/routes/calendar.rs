use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{gmail_token::GmailAccessToken, jwt::Claims},
    calendar::{
        event::{AddEventRequest, EventView},
        EventWindow,
    },
    error::{AppError, AppJsonResult},
    pipeline::traits::ProviderError,
    server_config::cfg,
    ServerState,
};

fn calendar_error(error: ProviderError, action: &str) -> AppError {
    match error {
        ProviderError::Unauthorized(msg) => {
            AppError::Unauthorized(format!("Google Calendar rejected the access token: {msg}"))
        }
        ProviderError::NotFound(id) => AppError::NotFound(format!("Event {id} not found")),
        ProviderError::Upstream(e) => {
            tracing::error!("Calendar error while trying to {}: {:?}", action, e);
            AppError::BadGateway(format!("Failed to {action}"))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEventResponse {
    pub success: bool,
    pub event_id: String,
    pub event_link: String,
    pub message: &'static str,
}

/// # POST /calendar/events
pub async fn add_event(
    claims: Claims,
    GmailAccessToken(token): GmailAccessToken,
    State(state): State<ServerState>,
    Json(request): Json<AddEventRequest>,
) -> AppJsonResult<AddEventResponse> {
    let email_id = request.email_id.clone();
    let event = request
        .into_event(&cfg.calendar.time_zone)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let calendar = (state.calendar_factory)(token);
    let created = calendar
        .insert(event)
        .await
        .map_err(|e| calendar_error(e, "create calendar event"))?;

    let event_id = created.id.unwrap_or_default();
    tracing::info!(
        "Calendar event {} created for user {} from message {:?}",
        event_id,
        claims.sub,
        email_id
    );

    Ok(Json(AddEventResponse {
        success: true,
        event_id,
        event_link: created.html_link.unwrap_or_default(),
        message: "Event added to your Google Calendar with reminders",
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEventQuery {
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteEventResponse {
    pub success: bool,
    pub message: &'static str,
}

/// # DELETE /calendar/events?eventId=
pub async fn delete_event(
    claims: Claims,
    GmailAccessToken(token): GmailAccessToken,
    State(state): State<ServerState>,
    Query(query): Query<DeleteEventQuery>,
) -> AppJsonResult<DeleteEventResponse> {
    let event_id = query
        .event_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("eventId is required".to_string()))?;

    let calendar = (state.calendar_factory)(token);
    calendar
        .delete(&event_id)
        .await
        .map_err(|e| calendar_error(e, "delete calendar event"))?;

    tracing::info!("Calendar event {} deleted for user {}", event_id, claims.sub);
    Ok(Json(DeleteEventResponse {
        success: true,
        message: "Event removed from your Google Calendar",
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub days: Option<String>,
}

impl EventsQuery {
    /// Falls back to the default window for missing, malformed or out of range values
    fn days(&self) -> u32 {
        self.days
            .as_deref()
            .and_then(|d| d.parse::<u32>().ok())
            .filter(|d| (1..=cfg.calendar.max_days).contains(d))
            .unwrap_or(cfg.calendar.default_days)
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub success: bool,
    pub events: Vec<EventView>,
    pub total: usize,
}

/// # GET /calendar/events?days=
///
/// Upcoming events from now until `days` ahead.
pub async fn events(
    _claims: Claims,
    GmailAccessToken(token): GmailAccessToken,
    State(state): State<ServerState>,
    Query(query): Query<EventsQuery>,
) -> AppJsonResult<EventsResponse> {
    let now = Utc::now();
    let window = EventWindow {
        time_min: now.to_rfc3339(),
        time_max: (now + chrono::Duration::days(query.days().into())).to_rfc3339(),
        max_results: cfg.calendar.max_results,
    };

    let calendar = (state.calendar_factory)(token);
    let events: Vec<EventView> = calendar
        .list(&window)
        .await
        .map_err(|e| calendar_error(e, "fetch calendar events"))?
        .into_iter()
        .map(EventView::from)
        .collect();

    Ok(Json(EventsResponse {
        success: true,
        total: events.len(),
        events,
    }))
}
