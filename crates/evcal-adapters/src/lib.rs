//! Adapter contracts for the external services the ingestion pipeline talks
//! to: the structured-extraction model and the messaging reply API.

use async_trait::async_trait;
use evcal_core::{DraftError, ExtractedEvent};
use thiserror::Error;
use tracing::info;

mod line;
mod openai;

pub use line::{reply_body, LineConfig, LineNotifier, MAX_REPLY_CHARS};
pub use openai::{build_request, parse_completion, OpenAiConfig, OpenAiExtractor, FUNCTION_NAME};

pub const CRATE_NAME: &str = "evcal-adapters";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction api error: {0}")]
    Api(String),
    #[error("extraction api returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("extraction request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed response")]
    Malformed,
    #[error("extraction arguments are not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Incomplete(#[from] DraftError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("reply request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reply api returned http {status}: {body}")]
    Http { status: u16, body: String },
}

/// Turns free text into a validated event. Implementations never set
/// `raw_text`; the caller attaches it.
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedEvent, ExtractionError>;
}

/// Best-effort text reply to the sender of a webhook message.
#[async_trait]
pub trait ReplyNotifier: Send + Sync {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), NotifyError>;
}

/// Logs replies instead of sending them. Used by CLI commands that run the
/// pipeline outside a webhook call.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl ReplyNotifier for NoopNotifier {
    async fn reply(&self, _reply_token: &str, text: &str) -> Result<(), NotifyError> {
        info!(reply = text, "reply suppressed");
        Ok(())
    }
}
