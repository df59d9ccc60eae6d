use anyhow::Context;
use mail_parser::{MessageParser, PartType};
use regex::Regex;

use crate::pipeline::traits::FetchedMessage;

const RE_BLANK_LINES_STR: &str = r"\n[ \t]*(\n[ \t]*)+";
const RE_LONG_SPACE_STR: &str = r"[ \t]{2,}";
const RE_DIVIDERS_STR: &str = r"[-=_]{3,}";

const SNIPPET_CHARS: usize = 200;

lazy_static::lazy_static!(
    static ref RE_BLANK_LINES: Regex = Regex::new(RE_BLANK_LINES_STR).unwrap();
    static ref RE_LONG_SPACE: Regex = Regex::new(RE_LONG_SPACE_STR).unwrap();
    static ref RE_DIVIDERS: Regex = Regex::new(RE_DIVIDERS_STR).unwrap();
);

/// A Gmail RAW message reduced to the text the enrichment engine reads.
/// Links are kept since application links are part of the answer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub id: String,
    pub thread_id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub body: Option<String>,
}

impl ParsedMessage {
    pub fn from_gmail_message(msg: google_gmail1::api::Message) -> anyhow::Result<Self> {
        let id = msg.id.clone().unwrap_or_default();
        let thread_id = msg.thread_id.clone().unwrap_or_default();
        let snippet = msg.snippet.clone().filter(|s| !s.trim().is_empty());

        let raw = msg
            .raw
            .as_ref()
            .context(format!("No raw message found in message response: {}", id))?;

        let parsed = MessageParser::default()
            .parse(raw)
            .context(format!("Could not parse RFC 2822 message {}", id))?;

        let subject = parsed
            .subject()
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "));
        let from = parsed
            .from()
            .and_then(|f| f.first().and_then(|x| x.address().map(|a| a.to_string())));
        let body = extract_body(&parsed);

        let snippet = snippet.or_else(|| {
            body.as_deref()
                .map(|b| b.chars().take(SNIPPET_CHARS).collect::<String>())
        });

        Ok(ParsedMessage {
            id,
            thread_id,
            from,
            subject,
            snippet,
            body,
        })
    }
}

impl From<ParsedMessage> for FetchedMessage {
    fn from(msg: ParsedMessage) -> Self {
        FetchedMessage {
            id: msg.id,
            subject: msg.subject.unwrap_or_default(),
            snippet: msg.snippet.unwrap_or_default(),
            body: msg.body.unwrap_or_default(),
        }
    }
}

/// First text body part; HTML-only messages are rendered to text
fn extract_body(msg: &mail_parser::Message) -> Option<String> {
    let part = msg.text_body.first().and_then(|id| msg.part(*id))?;
    let text = match &part.body {
        PartType::Text(text) => text.to_string(),
        PartType::Html(html) => html2text::from_read(html.as_bytes(), 400),
        _ => return None,
    };

    let text = text.replace("\r\n", "\n");
    let text = RE_DIVIDERS.replace_all(&text, " ");
    let text = RE_LONG_SPACE.replace_all(&text, " ");
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");
    let text = text.trim().to_string();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
