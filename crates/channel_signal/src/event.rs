use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, MessagePayload};

/// Where an accepted event came from.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum Classification {
    /// Someone else wrote to this account.
    Incoming,
    /// This account wrote to itself ("Note to Self").
    SelfNote,
    /// This account wrote to someone else from another device. Never delivered.
    Outgoing,
}

/// The three content classes the filters act on.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Message,
    Attachment,
    Reaction,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Message => "message",
            ContentKind::Attachment => "attachment",
            ContentKind::Reaction => "reaction",
        }
    }
}

/// The record handed to the downstream consumer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub message_text: String,
    pub attachments: Vec<Value>,
    pub reactions: Vec<Value>,
    pub source_number: String,
    pub source_uuid: String,
    pub source_name: String,
    pub timestamp: u64,
    pub server_received_timestamp: u64,
    pub server_delivered_timestamp: u64,
    pub account: String,
    pub has_content: bool,
    pub is_unidentified_sender: bool,
    pub classification: Classification,
    /// Untouched envelope, for consumers that need fields not mapped above.
    pub envelope: Value,
}

impl NormalizedEvent {
    pub(crate) fn build(
        envelope: &Envelope,
        payload: &MessagePayload,
        classification: Classification,
        account: String,
        raw_envelope: Value,
    ) -> Self {
        let message_text = payload.text();
        let attachments = payload.attachments();
        let reactions = payload.reactions();
        let has_content =
            !message_text.is_empty() || !attachments.is_empty() || !reactions.is_empty();
        NormalizedEvent {
            message_text,
            attachments,
            reactions,
            source_number: envelope.sender_number().unwrap_or_default().to_string(),
            source_uuid: envelope.sender_uuid().unwrap_or_default().to_string(),
            source_name: envelope.source_name.clone().unwrap_or_default(),
            timestamp: envelope.timestamp(),
            server_received_timestamp: envelope.server_received_timestamp.unwrap_or(0),
            server_delivered_timestamp: envelope.server_delivered_timestamp.unwrap_or(0),
            account,
            has_content,
            is_unidentified_sender: envelope.sender_number().is_none()
                && envelope.sender_uuid().is_none(),
            classification,
            envelope: raw_envelope,
        }
    }

    /// Identity a read receipt is addressed to: the uuid, else the number.
    pub fn sender_id(&self) -> Option<&str> {
        [&self.source_uuid, &self.source_number]
            .into_iter()
            .find(|id| !id.is_empty())
            .map(String::as_str)
    }

    pub fn contains(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Message => !self.message_text.is_empty(),
            ContentKind::Attachment => !self.attachments.is_empty(),
            ContentKind::Reaction => !self.reactions.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_camel_case() {
        let envelope = Envelope {
            timestamp: Some(100),
            source_uuid: Some("u1".into()),
            ..Default::default()
        };
        let payload = MessagePayload {
            message: Some("hi".into()),
            ..Default::default()
        };
        let event = NormalizedEvent::build(
            &envelope,
            &payload,
            Classification::Incoming,
            "+1".into(),
            json!({ "timestamp": 100 }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["messageText"], "hi");
        assert_eq!(value["sourceUuid"], "u1");
        assert_eq!(value["hasContent"], true);
        assert_eq!(value["isUnidentifiedSender"], false);
        assert_eq!(value["classification"], "Incoming");
        assert_eq!(value["envelope"]["timestamp"], 100);
    }

    #[test]
    fn test_sender_without_identity_is_unidentified() {
        let event = NormalizedEvent::build(
            &Envelope::default(),
            &MessagePayload::default(),
            Classification::Incoming,
            String::new(),
            Value::Null,
        );
        assert!(event.is_unidentified_sender);
        assert!(!event.has_content);
        assert!(!event.contains(ContentKind::Message));
    }

    #[test]
    fn test_sender_id_prefers_uuid() {
        let envelope = Envelope {
            source_number: Some("+100".into()),
            source_uuid: Some("uuid-1".into()),
            ..Default::default()
        };
        let build = |envelope: &Envelope| {
            NormalizedEvent::build(
                envelope,
                &MessagePayload::default(),
                Classification::Incoming,
                "+1".into(),
                Value::Null,
            )
        };
        assert_eq!(build(&envelope).sender_id(), Some("uuid-1"));

        let envelope = Envelope {
            source: Some("+200".into()),
            source_uuid: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(build(&envelope).sender_id(), Some("+200"));
        assert_eq!(build(&Envelope::default()).sender_id(), None);
    }
}
