//! LINE Messaging API reply adapter.

use async_trait::async_trait;
use evcal_storage::HttpClientConfig;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{NotifyError, ReplyNotifier};

/// Longest text a single LINE text message may carry.
pub const MAX_REPLY_CHARS: usize = 5000;

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub access_token: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct LineNotifier {
    client: reqwest::Client,
    config: LineConfig,
}

impl LineNotifier {
    pub fn new(config: LineConfig, http: &HttpClientConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http.build_client()?,
            config,
        })
    }
}

#[async_trait]
impl ReplyNotifier for LineNotifier {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/v2/bot/message/reply",
            self.config.base_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(&reply_body(reply_token, text))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                body,
            });
        }
        debug!(status = status.as_u16(), "reply delivered");
        Ok(())
    }
}

/// Reply payload carrying a single text message, truncated to
/// [`MAX_REPLY_CHARS`].
pub fn reply_body(reply_token: &str, text: &str) -> JsonValue {
    let text: String = text.chars().take(MAX_REPLY_CHARS).collect();
    json!({
        "replyToken": reply_token,
        "messages": [{ "type": "text", "text": text }],
    })
}
