//! OpenAI chat-completions extractor using a forced function call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use evcal_core::{current_year, CanonicalField, Category, Clock, EventDraft, ExtractedEvent, Nature};
use evcal_storage::HttpClientConfig;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info_span, warn, Instrument};

use crate::{EventExtractor, ExtractionError};

pub const FUNCTION_NAME: &str = "extract_calendar_event";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Offset in which "the current year" is determined.
    pub utc_offset: FixedOffset,
}

pub struct OpenAiExtractor {
    client: reqwest::Client,
    config: OpenAiConfig,
    clock: Arc<dyn Clock>,
}

impl OpenAiExtractor {
    pub fn new(
        config: OpenAiConfig,
        http: &HttpClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            client: http.build_client()?,
            config,
            clock,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn request_event(&self, text: &str, year: i32) -> Result<ExtractedEvent, ExtractionError> {
        let request = build_request(&self.config.model, text, year);
        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        let value: JsonValue = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(ExtractionError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(_) => return Err(ExtractionError::Malformed),
        };
        if !status.is_success() && value.get("error").is_none() {
            return Err(ExtractionError::Http {
                status: status.as_u16(),
                body,
            });
        }
        if let Some(tokens) = value.pointer("/usage/total_tokens").and_then(JsonValue::as_u64) {
            debug!(total_tokens = tokens, "extraction usage");
        }

        let validated = parse_completion(&value)?.validate()?;
        for unknown in &validated.unknown_labels {
            warn!(kind = unknown.kind, value = %unknown.value, "dropping unrecognized label");
        }
        Ok(validated.event)
    }
}

#[async_trait]
impl EventExtractor for OpenAiExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedEvent, ExtractionError> {
        let year = current_year(self.clock.as_ref(), self.config.utc_offset);
        let span = info_span!("extract", model = %self.config.model, year);
        self.request_event(text, year).instrument(span).await
    }
}

/// Chat-completions body: a system instruction pinning year-less dates to
/// `current_year`, the user text, and a forced `extract_calendar_event` call.
pub fn build_request(model: &str, text: &str, current_year: i32) -> JsonValue {
    let system = format!(
        "You extract event information from unstructured announcements and report it \
         through the {FUNCTION_NAME} function. If the text gives no explicit year, or the \
         year is ambiguous, always use {current_year}. Copy the description word for word \
         from the source text; never paraphrase or summarize it. Keep every value in the \
         language of the source text."
    );

    let mut properties = Map::new();
    for field in CanonicalField::ALL {
        if let Some(schema) = field_schema(field, current_year) {
            properties.insert(field.key().to_string(), schema);
        }
    }

    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": text },
        ],
        "tools": [{
            "type": "function",
            "function": {
                "name": FUNCTION_NAME,
                "description": "Extract one calendar event from the text. Details that fit no other \
                    field go into description, copied verbatim from the text.",
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": [CanonicalField::StartTime.key(), CanonicalField::Title.key()],
                },
            },
        }],
        "tool_choice": { "type": "function", "function": { "name": FUNCTION_NAME } },
    })
}

/// Schema for one model-produced property. `raw_text` is attached by the
/// pipeline and is not part of the model's output.
fn field_schema(field: CanonicalField, current_year: i32) -> Option<JsonValue> {
    let schema = match field {
        CanonicalField::StartTime => json!({
            "type": "string",
            "description": format!(
                "Event start ({}), preferably YYYY/MM/DD HH:MM. Use {current_year} when the year is unknown.",
                field.header()
            ),
        }),
        CanonicalField::EndTime => json!({
            "type": "string",
            "description": format!("Event end ({}), preferably YYYY/MM/DD HH:MM.", field.header()),
        }),
        CanonicalField::Title => json!({
            "type": "string",
            "description": format!("Name of the event ({}).", field.header()),
        }),
        CanonicalField::Location => json!({
            "type": "string",
            "description": format!("Exact venue where the event takes place ({}).", field.header()),
        }),
        CanonicalField::LocationCategory => json!({
            "type": "string",
            "description": format!(
                "Taiwan city or county of the venue, e.g. 高雄市 ({}).",
                field.header()
            ),
        }),
        CanonicalField::Category => json!({
            "type": "string",
            "enum": Category::ALL.iter().map(|c| c.label()).collect::<Vec<_>>(),
            "description": format!("Event category ({}).", field.header()),
        }),
        CanonicalField::Organizer => json!({
            "type": "string",
            "description": format!("Organizing unit ({}).", field.header()),
        }),
        CanonicalField::Link => json!({
            "type": "string",
            "description": format!("Related web link, e.g. the sign-up form ({}).", field.header()),
        }),
        CanonicalField::Nature => json!({
            "type": "string",
            "enum": Nature::ALL.iter().map(|n| n.label()).collect::<Vec<_>>(),
            "description": format!(
                "The single best-fitting kind of event ({}).",
                field.header()
            ),
        }),
        CanonicalField::Description => json!({
            "type": "string",
            "description": format!(
                "Remaining details, copied verbatim from the text without rewording ({}).",
                field.header()
            ),
        }),
        CanonicalField::RawText => return None,
    };
    Some(schema)
}

/// Pulls the forced function-call arguments out of a completion body. Accepts
/// both `tool_calls` and the legacy `function_call` shape.
pub fn parse_completion(body: &JsonValue) -> Result<EventDraft, ExtractionError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ExtractionError::Api(message));
    }

    let message = body
        .pointer("/choices/0/message")
        .ok_or(ExtractionError::Malformed)?;
    let call = message
        .pointer("/tool_calls/0/function")
        .or_else(|| message.get("function_call"))
        .ok_or(ExtractionError::Malformed)?;
    if call.get("name").and_then(JsonValue::as_str) != Some(FUNCTION_NAME) {
        return Err(ExtractionError::Malformed);
    }
    let arguments = call
        .get("arguments")
        .and_then(JsonValue::as_str)
        .ok_or(ExtractionError::Malformed)?;
    Ok(serde_json::from_str(arguments)?)
}
