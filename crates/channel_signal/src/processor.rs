//! Turns one raw frame into either an accepted [`NormalizedEvent`] or a
//! reason for dropping it.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::FilterFlags,
    dedup::DedupWindow,
    error::RelayError,
    envelope::{Envelope, Frame, MessagePayload},
    event::{Classification, ContentKind, NormalizedEvent},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    Malformed,
    Duplicate,
    Outgoing,
    Unclassifiable,
    Empty,
    Filtered(ContentKind),
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Malformed => "malformed",
            DiscardReason::Duplicate => "duplicate",
            DiscardReason::Outgoing => "outgoing",
            DiscardReason::Unclassifiable => "unclassifiable",
            DiscardReason::Empty => "empty",
            DiscardReason::Filtered(ContentKind::Message) => "filtered_message",
            DiscardReason::Filtered(ContentKind::Attachment) => "filtered_attachment",
            DiscardReason::Filtered(ContentKind::Reaction) => "filtered_reaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Accepted(Box<NormalizedEvent>),
    Discarded(DiscardReason),
}

impl FrameOutcome {
    pub fn event(&self) -> Option<&NormalizedEvent> {
        match self {
            FrameOutcome::Accepted(event) => Some(event),
            FrameOutcome::Discarded(_) => None,
        }
    }
}

/// Stateful per-relay frame pipeline. Not `Sync` on purpose: frames of one
/// connection go through it one at a time.
#[derive(Debug)]
pub struct FrameProcessor {
    account: String,
    filters: FilterFlags,
    dedup: DedupWindow,
}

impl FrameProcessor {
    pub fn new(account: impl Into<String>, filters: FilterFlags) -> Self {
        FrameProcessor {
            account: account.into(),
            filters,
            dedup: DedupWindow::default(),
        }
    }

    pub fn dedup_window(&self) -> &DedupWindow {
        &self.dedup
    }

    pub fn process(&mut self, text: &str) -> FrameOutcome {
        let (value, frame) = match parse_frame(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "dropping frame");
                return FrameOutcome::Discarded(DiscardReason::Malformed);
            }
        };
        let envelope = frame.envelope;
        let raw_envelope = value.get("envelope").cloned().unwrap_or(Value::Null);

        // dedup
        let timestamp = envelope.as_ref().map(Envelope::timestamp).unwrap_or(0);
        if !self.dedup.observe(timestamp) {
            return FrameOutcome::Discarded(DiscardReason::Duplicate);
        }

        // classify
        let Some(envelope) = envelope else {
            return FrameOutcome::Discarded(DiscardReason::Unclassifiable);
        };
        let (classification, payload) = match classify(&envelope) {
            Ok(found) => found,
            Err(reason) => return FrameOutcome::Discarded(reason),
        };

        let account = frame
            .account
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.account.clone());
        let event =
            NormalizedEvent::build(&envelope, payload, classification, account, raw_envelope);

        if !event.has_content {
            return FrameOutcome::Discarded(DiscardReason::Empty);
        }
        if let Some(kind) = self.filters.rejects(&event) {
            return FrameOutcome::Discarded(DiscardReason::Filtered(kind));
        }
        FrameOutcome::Accepted(Box::new(event))
    }
}

/// A sync echo is a note to self only when both ends are the same known uuid.
fn parse_frame(text: &str) -> Result<(Value, Frame), RelayError> {
    let value: Value = serde_json::from_str(text)?;
    let frame = Frame::deserialize(&value)?;
    Ok((value, frame))
}

fn classify(envelope: &Envelope) -> Result<(Classification, &MessagePayload), DiscardReason> {
    if let Some(data) = &envelope.data_message {
        return Ok((Classification::Incoming, data));
    }
    let Some(sent) = envelope
        .sync_message
        .as_ref()
        .and_then(|sync| sync.sent_message.as_ref())
    else {
        return Err(DiscardReason::Unclassifiable);
    };
    let destination = sent.destination_uuid.as_deref().filter(|s| !s.is_empty());
    match (envelope.sender_uuid(), destination) {
        (Some(source), Some(destination)) if source == destination => {
            Ok((Classification::SelfNote, &sent.payload))
        }
        _ => Err(DiscardReason::Outgoing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn processor() -> FrameProcessor {
        FrameProcessor::new("+10000000000", FilterFlags::default())
    }

    fn text_frame(timestamp: u64, text: &str) -> String {
        json!({
            "envelope": {
                "timestamp": timestamp,
                "sourceNumber": "+12223334444",
                "sourceUuid": "sender-uuid",
                "sourceName": "Alice",
                "dataMessage": { "message": text }
            },
            "account": "+10000000000"
        })
        .to_string()
    }

    fn sync_frame(timestamp: u64, source: &str, destination: &str) -> String {
        json!({
            "envelope": {
                "timestamp": timestamp,
                "sourceUuid": source,
                "syncMessage": {
                    "sentMessage": {
                        "destinationUuid": destination,
                        "message": "synced"
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_minimal_incoming_frame() {
        let mut p = processor();
        let outcome =
            p.process(r#"{"envelope":{"timestamp":100,"dataMessage":{"message":"hi"}}}"#);
        let event = outcome.event().expect("frame should be accepted");
        assert_eq!(event.message_text, "hi");
        assert_eq!(event.classification, Classification::Incoming);
        assert_eq!(event.timestamp, 100);
        assert_eq!(event.account, "+10000000000");
        assert!(event.is_unidentified_sender);
        assert_eq!(event.envelope["dataMessage"]["message"], "hi");
    }

    #[test]
    fn test_fields_are_mapped() {
        let mut p = processor();
        let outcome = p.process(&text_frame(5, "hello"));
        let event = outcome.event().unwrap();
        assert_eq!(event.source_number, "+12223334444");
        assert_eq!(event.source_uuid, "sender-uuid");
        assert_eq!(event.source_name, "Alice");
        assert!(event.has_content);
        assert!(!event.is_unidentified_sender);
    }

    #[test]
    fn test_duplicate_timestamp_delivered_once() {
        let mut p = processor();
        assert!(p.process(&text_frame(7, "first")).event().is_some());
        assert_eq!(
            p.process(&text_frame(7, "second")),
            FrameOutcome::Discarded(DiscardReason::Duplicate)
        );
    }

    #[test]
    fn test_1001st_timestamp_accepted_after_reset() {
        let mut p = processor();
        for ts in 1..=1000u64 {
            assert!(p.process(&text_frame(ts, "x")).event().is_some());
        }
        assert!(p.process(&text_frame(5000, "x")).event().is_some());
        assert_eq!(p.dedup_window().len(), 1);
    }

    #[test]
    fn test_note_to_self_is_delivered() {
        let mut p = processor();
        let outcome = p.process(&sync_frame(1, "me", "me"));
        let event = outcome.event().unwrap();
        assert_eq!(event.classification, Classification::SelfNote);
        assert_eq!(event.message_text, "synced");
    }

    #[test]
    fn test_outgoing_sync_is_dropped() {
        let mut p = processor();
        assert_eq!(
            p.process(&sync_frame(1, "me", "someone-else")),
            FrameOutcome::Discarded(DiscardReason::Outgoing)
        );
    }

    #[test]
    fn test_sync_without_destination_is_outgoing() {
        let mut p = processor();
        let frame = json!({
            "envelope": {
                "timestamp": 3,
                "sourceUuid": "me",
                "syncMessage": { "sentMessage": { "message": "to a group" } }
            }
        })
        .to_string();
        assert_eq!(
            p.process(&frame),
            FrameOutcome::Discarded(DiscardReason::Outgoing)
        );
    }

    #[test]
    fn test_receipt_and_typing_envelopes_are_unclassifiable() {
        let mut p = processor();
        let frame = json!({
            "envelope": { "timestamp": 9, "receiptMessage": { "isRead": true } }
        })
        .to_string();
        assert_eq!(
            p.process(&frame),
            FrameOutcome::Discarded(DiscardReason::Unclassifiable)
        );
    }

    #[test]
    fn test_empty_content_is_never_delivered() {
        for filters in [
            FilterFlags::default(),
            FilterFlags {
                ignore_messages: true,
                ignore_attachments: true,
                ignore_reactions: true,
            },
        ] {
            let mut p = FrameProcessor::new("+1", filters);
            let frame = json!({
                "envelope": {
                    "timestamp": 11,
                    "dataMessage": { "message": "", "attachments": [], "reactions": [] }
                }
            })
            .to_string();
            assert_eq!(
                p.process(&frame),
                FrameOutcome::Discarded(DiscardReason::Empty)
            );
        }
    }

    #[test]
    fn test_ignore_attachments_drops_attachment_only_frame() {
        let mut p = FrameProcessor::new(
            "+1",
            FilterFlags {
                ignore_attachments: true,
                ..Default::default()
            },
        );
        let frame = json!({
            "envelope": {
                "timestamp": 12,
                "dataMessage": { "attachments": [{ "id": "att-1", "contentType": "image/png" }] }
            }
        })
        .to_string();
        assert_eq!(
            p.process(&frame),
            FrameOutcome::Discarded(DiscardReason::Filtered(ContentKind::Attachment))
        );
    }

    #[test]
    fn test_ignore_reactions_and_messages() {
        let mut p = FrameProcessor::new(
            "+1",
            FilterFlags {
                ignore_reactions: true,
                ..Default::default()
            },
        );
        let reaction = json!({
            "envelope": {
                "timestamp": 13,
                "dataMessage": { "reaction": { "emoji": "🔥" } }
            }
        })
        .to_string();
        assert_eq!(
            p.process(&reaction),
            FrameOutcome::Discarded(DiscardReason::Filtered(ContentKind::Reaction))
        );
        // plain text still goes through
        assert!(p.process(&text_frame(14, "hello")).event().is_some());

        let mut p = FrameProcessor::new(
            "+1",
            FilterFlags {
                ignore_messages: true,
                ..Default::default()
            },
        );
        assert_eq!(
            p.process(&text_frame(15, "hello")),
            FrameOutcome::Discarded(DiscardReason::Filtered(ContentKind::Message))
        );
    }

    #[test]
    fn test_malformed_frames_are_discarded() {
        let mut p = processor();
        assert_eq!(
            p.process("{not json"),
            FrameOutcome::Discarded(DiscardReason::Malformed)
        );
        assert_eq!(
            p.process(r#"{"envelope":{"timestamp":"yesterday"}}"#),
            FrameOutcome::Discarded(DiscardReason::Malformed)
        );
        // malformed frames do not touch the dedup window
        assert!(p.dedup_window().is_empty());
    }

    #[test]
    fn test_parse_errors_surface_as_parse_variant() {
        let err = parse_frame("{not json").unwrap_err();
        assert!(matches!(err, RelayError::Parse(_)));
        assert!(err.to_string().starts_with("malformed frame:"));

        let err = parse_frame(r#"{"envelope":{"timestamp":"yesterday"}}"#).unwrap_err();
        assert!(matches!(err, RelayError::Parse(_)));
    }

    #[test]
    fn test_frame_without_envelope_uses_timestamp_zero() {
        let mut p = processor();
        assert_eq!(
            p.process(r#"{"account":"+1"}"#),
            FrameOutcome::Discarded(DiscardReason::Unclassifiable)
        );
        assert!(p.dedup_window().contains(0));
    }

    #[test]
    fn test_outgoing_frames_still_consume_dedup_slot() {
        let mut p = processor();
        p.process(&sync_frame(20, "me", "other"));
        assert_eq!(
            p.process(&text_frame(20, "late")),
            FrameOutcome::Discarded(DiscardReason::Duplicate)
        );
    }
}
