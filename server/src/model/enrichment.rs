use derive_more::derive::Display;
use serde::{Deserialize, Deserializer, Serialize};

/// Categories that describe a job opening and therefore need a company name
const JOB_CATEGORIES: [&str; 4] = ["internship", "full-time", "full time", "job offer"];

const MIN_SUMMARY_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Structured output of analyzing one email
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub apply_link: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub other_links: Vec<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub eligibility: Option<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub timings: Option<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub salary: Option<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub event_details: Option<String>,
    #[serde(default, deserialize_with = "structured_text")]
    pub requirements: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attachment_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ValidationError {
    #[display("category is required")]
    MissingCategory,
    #[display("summary is too short or missing")]
    SummaryTooShort,
    #[display("company name missing for job category: {_0}")]
    MissingCompany(String),
}

impl std::error::Error for ValidationError {}

impl EnrichmentResult {
    /// Reject answers the feed cannot display
    pub fn validate(&self) -> Result<(), ValidationError> {
        let category = self.category.trim();
        if category.is_empty() {
            return Err(ValidationError::MissingCategory);
        }

        if self.summary.trim().chars().count() < MIN_SUMMARY_CHARS {
            return Err(ValidationError::SummaryTooShort);
        }

        if self.is_job_offer() {
            let has_company = self
                .company
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty());
            if !has_company {
                return Err(ValidationError::MissingCompany(category.to_string()));
            }
        }

        Ok(())
    }

    pub fn is_job_offer(&self) -> bool {
        let category = self.category.trim().to_lowercase();
        JOB_CATEGORIES.contains(&category.as_str())
    }
}

/// The result as it is emitted to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEmail {
    pub message_id: String,
    pub from_cache: bool,
    #[serde(flatten)]
    pub result: EnrichmentResult,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Models answer bullet-point fields inconsistently (string, list, object).
/// Everything collapses to a single optional text block.
fn structured_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(value))
}

fn value_to_text(value: serde_json::Value) -> Option<String> {
    use serde_json::Value;

    let text = match value {
        Value::Null => return None,
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .filter_map(value_to_text)
            .map(|line| {
                if line.starts_with('•') {
                    line
                } else {
                    format!("• {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
pub(crate) fn sample_result(category: &str) -> EnrichmentResult {
    EnrichmentResult {
        summary: "Campus drive for backend engineers".to_string(),
        category: category.to_string(),
        tags: vec!["on-campus".to_string()],
        priority: Priority::High,
        company: Some("Acme Corp".to_string()),
        ..Default::default()
    }
}
