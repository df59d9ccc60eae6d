//! Google Calendar reminders for opportunities found in the inbox.

pub mod client;
pub mod event;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::traits::ProviderError;

/// Start or end of an event. Timed events carry `date_time`, all-day events `date`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    pub fn as_display(&self) -> String {
        self.date_time
            .clone()
            .or_else(|| self.date.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReminder {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminders {
    pub use_default: bool,
    #[serde(default)]
    pub overrides: Vec<EventReminder>,
}

/// The subset of the Calendar `Event` resource the server reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<EventReminders>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<CalendarEvent>,
}

/// Window of upcoming events to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWindow {
    pub time_min: String,
    pub time_max: String,
    pub max_results: u32,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Creates the event and returns it as stored, with `id` and `html_link` set
    async fn insert(&self, event: CalendarEvent) -> Result<CalendarEvent, ProviderError>;

    async fn delete(&self, event_id: &str) -> Result<(), ProviderError>;

    /// Single (expanded) events in the window, ordered by start time
    async fn list(&self, window: &EventWindow) -> Result<Vec<CalendarEvent>, ProviderError>;
}
