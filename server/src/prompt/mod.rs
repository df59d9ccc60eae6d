pub mod cached;
pub mod enrichment;

use std::borrow::Cow;

use anyhow::Context;
use indoc::{formatdoc, indoc};
use serde::{Deserialize, Serialize};

use crate::model::enrichment::EnrichmentResult;

pub use cached::CachedEngine;
pub use enrichment::ChatEnrichmentEngine;

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiErrorBody {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub error: ChatApiErrorBody,
}

impl ChatApiError {
    pub fn is_rate_limit(&self) -> bool {
        let matches = |s: &Option<String>| {
            s.as_deref()
                .is_some_and(|s| s.contains("rate_limit") || s.contains("requests"))
        };
        matches(&self.error.code) || matches(&self.error.kind)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

pub const ENRICHMENT_SYSTEM_PROMPT: &str = indoc! {r#"
    You are a specialized assistant for campus placement and recruitment emails.
    Return ONLY a valid JSON object.

    CATEGORIZATION RULES (category field, pick the most specific one):
    - "internship": internship opportunities, summer internships, intern positions
    - "job offer": full-time job offers, placement offers, FTE positions
    - "ppt": pre-placement talks, company presentations, PPT schedules
    - "workshop": workshops, bootcamps, training sessions, hackathons
    - "exam": online assessments, tests, coding rounds, aptitude tests
    - "interview": interview schedules, interview calls, HR rounds
    - "result": result announcements, shortlists, selection lists
    - "reminder": deadline reminders, follow-ups, last date notices
    - "announcement": general placement announcements, policy updates
    - "registration": registration links, sign-up forms, application deadlines

    TAGGING RULES (tags field, array of every applicable tag):
    ["urgent", "high-package", "dream-company", "mass-hiring", "off-campus", "on-campus", "remote", "hybrid", "wfh", "tier-1", "startup", "mnc", "govt", "psu", "core", "it", "non-tech", "fresher-friendly"]

    JSON FIELD RULES:
    - summary: one or two sentences describing the email.
    - deadline: YYYY-MM-DD or null.
    - otherLinks, tags: arrays of strings.
    - eligibility, timings, salary, location, eventDetails, requirements: a single string of "\n• " bullet points.
    - company, role, applyLink, description, attachmentSummary: a string or null.
    - company is required for "internship" and "job offer".
    - When data is missing use null, not an empty string.
    - priority: "high" if the deadline is within 3 days or the company is a dream company, "medium" if within a week, "low" otherwise."#
};

/// Cut `body` to at most `max_chars` characters, marking the cut with `...`
pub fn truncate_body(body: &str, max_chars: usize) -> Cow<'_, str> {
    match body.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(format!("{}...", &body[..byte_idx])),
        None => Cow::Borrowed(body),
    }
}

pub fn enrichment_user_prompt(subject: &str, snippet: &str, body: &str, max_body_chars: usize) -> String {
    let body = truncate_body(body, max_body_chars);
    formatdoc! {"
        Subject: {subject}
        Snippet: {snippet}
        Body: {body}"
    }
}

/// Parse the model's message content. Tolerates a Markdown code fence around the JSON.
pub fn parse_enrichment_answer(content: &str) -> anyhow::Result<EnrichmentResult> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(json.trim())
        .with_context(|| format!("Could not parse JSON response: {}", content))
}
