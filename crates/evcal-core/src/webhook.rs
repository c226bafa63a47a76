use serde::{Deserialize, Serialize};

/// Messaging webhook body. Only the first event is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub reply_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A qualifying text message, created per webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender_id: Option<String>,
    pub reply_token: String,
    pub raw_text: String,
}

impl IncomingMessage {
    /// `None` unless the event is a `message` event carrying a `text` message.
    pub fn from_event(event: &WebhookEvent) -> Option<Self> {
        if event.event_type != "message" {
            return None;
        }
        let message = event.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        Some(Self {
            sender_id: event.source.as_ref().and_then(|s| s.user_id.clone()),
            reply_token: event.reply_token.clone().unwrap_or_default(),
            raw_text: message.text.clone()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_event_qualifies() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "destination": "Uabc",
            "events": [{
                "type": "message",
                "replyToken": "r-1",
                "source": {"type": "user", "userId": "U123"},
                "message": {"type": "text", "id": "m-1", "text": "讀書會 7/1"}
            }]
        }))
        .unwrap();
        let msg = IncomingMessage::from_event(&payload.events[0]).unwrap();
        assert_eq!(msg.reply_token, "r-1");
        assert_eq!(msg.sender_id.as_deref(), Some("U123"));
        assert_eq!(msg.raw_text, "讀書會 7/1");
    }

    #[test]
    fn sticker_and_follow_events_do_not_qualify() {
        let sticker: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "replyToken": "r-2",
            "message": {"type": "sticker", "id": "m-2"}
        }))
        .unwrap();
        let follow: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "follow",
            "replyToken": "r-3"
        }))
        .unwrap();
        assert!(IncomingMessage::from_event(&sticker).is_none());
        assert!(IncomingMessage::from_event(&follow).is_none());
    }
}
