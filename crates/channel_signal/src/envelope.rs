//! Wire model of the frames pushed by the receive stream.
//!
//! Only the fields the relay reads are modelled; anything else is tolerated
//! and still reaches consumers through the raw envelope pass-through.

use serde::Deserialize;
use serde_json::Value;

/// One text frame: `{ "envelope": {...}, "account": "+123" }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub envelope: Option<Envelope>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    pub timestamp: Option<u64>,
    pub source: Option<String>,
    pub source_number: Option<String>,
    pub source_uuid: Option<String>,
    pub source_name: Option<String>,
    pub source_device: Option<u32>,
    pub server_received_timestamp: Option<u64>,
    pub server_delivered_timestamp: Option<u64>,
    pub data_message: Option<MessagePayload>,
    pub sync_message: Option<SyncMessage>,
}

/// Content shared by direct messages and echoed sent messages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePayload {
    pub message: Option<String>,
    pub attachments: Option<Vec<Value>>,
    pub reactions: Option<Vec<Value>>,
    /// signal-cli reports a single reaction per envelope under this key.
    pub reaction: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncMessage {
    pub sent_message: Option<SentMessage>,
}

/// A message this account sent from another device, echoed back.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SentMessage {
    pub destination: Option<String>,
    pub destination_number: Option<String>,
    pub destination_uuid: Option<String>,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl Envelope {
    /// Dedup and receipt key. Absent means 0.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.unwrap_or(0)
    }

    /// Phone number of the sender, falling back to the legacy `source` field.
    pub fn sender_number(&self) -> Option<&str> {
        self.source_number
            .as_deref()
            .or(self.source.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn sender_uuid(&self) -> Option<&str> {
        self.source_uuid.as_deref().filter(|s| !s.is_empty())
    }
}

impl MessagePayload {
    pub fn text(&self) -> String {
        self.message.clone().unwrap_or_default()
    }

    pub fn attachments(&self) -> Vec<Value> {
        self.attachments.clone().unwrap_or_default()
    }

    /// `reactions` wins when both shapes are present.
    pub fn reactions(&self) -> Vec<Value> {
        match (&self.reactions, &self.reaction) {
            (Some(list), _) => list.clone(),
            (None, Some(Value::Null)) | (None, None) => Vec::new(),
            (None, Some(single)) => vec![single.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_timestamp_defaults_to_zero() {
        let frame: Frame = serde_json::from_value(json!({
            "envelope": { "dataMessage": { "message": "hi" } }
        }))
        .unwrap();
        assert_eq!(frame.envelope.unwrap().timestamp(), 0);
    }

    #[test]
    fn test_null_fields_are_tolerated() {
        let frame: Frame = serde_json::from_value(json!({
            "envelope": {
                "timestamp": null,
                "sourceUuid": null,
                "dataMessage": { "message": null, "attachments": null, "reactions": null }
            },
            "account": null
        }))
        .unwrap();
        let envelope = frame.envelope.unwrap();
        let data = envelope.data_message.unwrap();
        assert_eq!(data.text(), "");
        assert!(data.attachments().is_empty());
        assert!(data.reactions().is_empty());
    }

    #[test]
    fn test_sent_message_payload_is_flattened() {
        let frame: Frame = serde_json::from_value(json!({
            "envelope": {
                "timestamp": 7,
                "sourceUuid": "me",
                "syncMessage": {
                    "sentMessage": {
                        "destinationUuid": "me",
                        "message": "note to self",
                        "attachments": [{ "id": "a1" }]
                    }
                }
            }
        }))
        .unwrap();
        let sent = frame
            .envelope
            .unwrap()
            .sync_message
            .unwrap()
            .sent_message
            .unwrap();
        assert_eq!(sent.destination_uuid.as_deref(), Some("me"));
        assert_eq!(sent.payload.text(), "note to self");
        assert_eq!(sent.payload.attachments().len(), 1);
    }

    #[test]
    fn test_single_reaction_becomes_sequence() {
        let payload: MessagePayload = serde_json::from_value(json!({
            "reaction": { "emoji": "👍", "targetSentTimestamp": 1 }
        }))
        .unwrap();
        assert_eq!(payload.reactions(), vec![json!({ "emoji": "👍", "targetSentTimestamp": 1 })]);
    }
}
