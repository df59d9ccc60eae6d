use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{CalendarEvent, EventDateTime, EventReminder, EventReminders};

/// Appended to every description so our events can be told apart later
pub const ADDED_MARKER: &str = "Added via inbox enrichment";

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// All-day dates are scheduled at this hour
const DATE_ONLY_HOUR: u32 = 10;

/// A point in time as given by the caller. Times without an offset are
/// read in the calendar's configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl EventTime {
    /// RFC 3339, `YYYY-MM-DDTHH:MM:SS`, or `YYYY-MM-DD` when `allow_date` is set
    pub fn parse(value: &str, allow_date: bool) -> Option<Self> {
        let value = value.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(value) {
            return Some(EventTime::Zoned(t));
        }
        if let Ok(t) = NaiveDateTime::parse_from_str(value, NAIVE_FORMAT) {
            return Some(EventTime::Local(t));
        }
        if !allow_date {
            return None;
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(DATE_ONLY_HOUR, 0, 0))
            .map(EventTime::Local)
    }

    pub fn plus(self, duration: Duration) -> Self {
        match self {
            EventTime::Zoned(t) => EventTime::Zoned(t + duration),
            EventTime::Local(t) => EventTime::Local(t + duration),
        }
    }

    fn to_event_date_time(self, time_zone: &str) -> EventDateTime {
        let date_time = match self {
            EventTime::Zoned(t) => t.to_rfc3339(),
            EventTime::Local(t) => t.format(NAIVE_FORMAT).to_string(),
        };
        EventDateTime {
            date_time: Some(date_time),
            date: None,
            time_zone: Some(time_zone.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Deadline,
    Interview,
    Exam,
    Event,
    #[default]
    #[serde(other)]
    Other,
}

impl EventType {
    /// Google Calendar color palette id
    pub fn color_id(self) -> &'static str {
        match self {
            EventType::Deadline => "11",
            EventType::Interview => "7",
            EventType::Exam => "6",
            EventType::Event => "9",
            EventType::Other => "1",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddEventRequest {
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    /// Message the event was found in
    pub email_id: String,
    pub company: String,
    pub role: String,
    pub event_type: EventType,
}

#[derive(Debug, PartialEq, Eq, derive_more::derive::Display)]
pub enum InvalidEvent {
    #[display("Title and startTime are required")]
    MissingFields,
    #[display("Invalid startTime format. Use ISO 8601 format (e.g., 2026-02-15T10:00:00 or 2026-02-15)")]
    StartTime,
    #[display("Invalid endTime format. Use ISO 8601 format")]
    EndTime,
}

impl AddEventRequest {
    fn full_description(&self) -> String {
        let mut description = String::new();
        if !self.company.is_empty() || !self.role.is_empty() {
            description.push_str(&format!("Company: {}\nRole: {}\n\n", self.company, self.role));
        }
        description.push_str(&self.description);
        description.push_str("\n\n---\n");
        description.push_str(ADDED_MARKER);
        description
    }

    /// Validates the request and builds the event to insert
    pub fn into_event(self, time_zone: &str) -> Result<CalendarEvent, InvalidEvent> {
        if self.title.trim().is_empty() || self.start_time.trim().is_empty() {
            return Err(InvalidEvent::MissingFields);
        }
        let start = EventTime::parse(&self.start_time, true).ok_or(InvalidEvent::StartTime)?;
        let end = if self.end_time.trim().is_empty() {
            start.plus(Duration::hours(1))
        } else {
            EventTime::parse(&self.end_time, false).ok_or(InvalidEvent::EndTime)?
        };

        Ok(CalendarEvent {
            description: Some(self.full_description()),
            location: Some(self.location).filter(|l| !l.is_empty()),
            start: Some(start.to_event_date_time(time_zone)),
            end: Some(end.to_event_date_time(time_zone)),
            color_id: Some(self.event_type.color_id().to_string()),
            reminders: Some(default_reminders()),
            summary: Some(self.title),
            ..Default::default()
        })
    }
}

/// Popups 30 and 60 minutes ahead, an email the day before
fn default_reminders() -> EventReminders {
    EventReminders {
        use_default: false,
        overrides: vec![
            EventReminder {
                method: "popup".to_string(),
                minutes: 30,
            },
            EventReminder {
                method: "popup".to_string(),
                minutes: 60,
            },
            EventReminder {
                method: "email".to_string(),
                minutes: 1440,
            },
        ],
    }
}

/// An upcoming event as the client sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub link: String,
    pub color_id: String,
    /// Created by this server
    pub added_from_inbox: bool,
}

impl From<CalendarEvent> for EventView {
    fn from(event: CalendarEvent) -> Self {
        let description = event.description.unwrap_or_default();
        Self {
            id: event.id.unwrap_or_default(),
            title: event.summary.unwrap_or_default(),
            added_from_inbox: description.contains(ADDED_MARKER),
            description,
            start_time: event.start.map(|s| s.as_display()).unwrap_or_default(),
            end_time: event.end.map(|e| e.as_display()).unwrap_or_default(),
            location: event.location.unwrap_or_default(),
            link: event.html_link.unwrap_or_default(),
            color_id: event.color_id.unwrap_or_default(),
        }
    }
}
