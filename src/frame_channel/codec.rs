//! Feed message codec
//!
//! Text messages are JSON envelopes `{"event": ..., "data": ...}`.
//! Binary messages carry one frame with a fixed 18-byte header:
//!
//! ```text
//! frame_number: u64 BE | timestamp: i64 BE | flags: u8 | quality: u8 | payload
//! ```
//!
//! `flags` bit 0 marks an observed incident, `quality` 0xFF means absent.

use crate::error::{Error, Result};
use crate::models::{Alert, AlertRecord, Frame, FramePayload};
use serde::{Deserialize, Serialize};

/// Binary header length
pub const BINARY_HEADER_LEN: usize = 18;

const FLAG_INCIDENT: u8 = 0x01;
const QUALITY_ABSENT: u8 = 0xFF;

/// Frame transport message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Base64 image payload
    pub frame: String,
    pub timestamp: i64,
    pub frame_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_detected: Option<bool>,
}

impl From<FrameMessage> for Frame {
    fn from(msg: FrameMessage) -> Self {
        Frame::new(
            FramePayload::Encoded(msg.frame),
            msg.frame_number,
            msg.timestamp,
            msg.incident_detected.unwrap_or(false),
            msg.quality,
        )
    }
}

/// Incident transport message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentMessage {
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
}

/// Feed envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum FeedMessage {
    VideoFrame(FrameMessage),
    Incident(IncidentMessage),
    Notification(AlertRecord),
}

/// Raw message from a feed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Decoded feed event
#[derive(Debug)]
pub enum FeedEvent {
    Frame(Frame),
    Incident(IncidentMessage),
    Alert(Alert),
    /// Well-formed envelope with an event name this client does not handle
    Ignored(String),
}

/// Decode one raw message
pub fn decode(message: RawMessage) -> Result<FeedEvent> {
    match message {
        RawMessage::Text(text) => decode_text(&text),
        RawMessage::Binary(bytes) => decode_binary(bytes).map(FeedEvent::Frame),
    }
}

fn decode_text(text: &str) -> Result<FeedEvent> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let event = value
        .get("event")
        .and_then(|e| e.as_str())
        .ok_or_else(|| Error::Parse("feed message without event name".to_string()))?;

    if !matches!(event, "video_frame" | "incident" | "notification") {
        return Ok(FeedEvent::Ignored(event.to_string()));
    }

    let message: FeedMessage = serde_json::from_value(value)?;
    Ok(match message {
        FeedMessage::VideoFrame(frame) => FeedEvent::Frame(frame.into()),
        FeedMessage::Incident(incident) => FeedEvent::Incident(incident),
        FeedMessage::Notification(record) => FeedEvent::Alert(record.into()),
    })
}

fn decode_binary(mut bytes: Vec<u8>) -> Result<Frame> {
    if bytes.len() < BINARY_HEADER_LEN {
        return Err(Error::Parse(format!(
            "binary frame too short: {} bytes (header is {})",
            bytes.len(),
            BINARY_HEADER_LEN
        )));
    }

    let mut number = [0u8; 8];
    number.copy_from_slice(&bytes[0..8]);
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&bytes[8..16]);
    let flags = bytes[16];
    let quality = bytes[17];

    let payload = bytes.split_off(BINARY_HEADER_LEN);

    Ok(Frame::new(
        FramePayload::Raw(payload),
        u64::from_be_bytes(number),
        i64::from_be_bytes(timestamp),
        flags & FLAG_INCIDENT != 0,
        (quality != QUALITY_ABSENT).then_some(quality),
    ))
}

/// Encode a binary frame message (used by test feeds and tooling)
pub fn encode_binary(
    frame_number: u64,
    timestamp: i64,
    incident: bool,
    quality: Option<u8>,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(BINARY_HEADER_LEN + payload.len());
    out.extend_from_slice(&frame_number.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.push(if incident { FLAG_INCIDENT } else { 0 });
    out.push(quality.unwrap_or(QUALITY_ABSENT));
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertKind;
    use serde_json::json;

    #[test]
    fn test_decode_video_frame() {
        let text = json!({
            "event": "video_frame",
            "data": {
                "frame": "AQID",
                "timestamp": 1700,
                "frame_number": 12,
                "quality": 85,
                "incident_detected": true
            }
        })
        .to_string();

        match decode(RawMessage::Text(text)).unwrap() {
            FeedEvent::Frame(frame) => {
                assert_eq!(frame.sequence_number, 12);
                assert_eq!(frame.capture_timestamp, 1700);
                assert_eq!(frame.quality_hint, Some(85));
                assert!(frame.incident_observed);
                assert_eq!(frame.payload, FramePayload::Encoded("AQID".to_string()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_frame_without_optional_fields() {
        let text = r#"{"event":"video_frame","data":{"frame":"","timestamp":1,"frame_number":2}}"#;
        match decode(RawMessage::Text(text.to_string())).unwrap() {
            FeedEvent::Frame(frame) => {
                assert!(!frame.incident_observed);
                assert_eq!(frame.quality_hint, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_incident_and_notification() {
        let incident = r#"{"event":"incident","data":{"timestamp":99,"message":"Fall detected"}}"#;
        match decode(RawMessage::Text(incident.to_string())).unwrap() {
            FeedEvent::Incident(msg) => {
                assert_eq!(msg.timestamp, 99);
                assert_eq!(msg.message, "Fall detected");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let notification = json!({
            "event": "notification",
            "data": {
                "id": "n-1",
                "type": "fall_alert",
                "timestamp": 3,
                "acknowledged": false,
                "ack_time": null,
                "data": { "message": "Fall", "severity": "medium" }
            }
        })
        .to_string();
        match decode(RawMessage::Text(notification)).unwrap() {
            FeedEvent::Alert(alert) => {
                assert_eq!(alert.id, "n-1");
                assert_eq!(alert.kind, AlertKind::FallAlert);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_ignored() {
        let text = r#"{"event":"server_stats","data":{"fps":30}}"#;
        assert!(matches!(
            decode(RawMessage::Text(text.to_string())).unwrap(),
            FeedEvent::Ignored(name) if name == "server_stats"
        ));
    }

    #[test]
    fn test_malformed_text_is_error() {
        assert!(decode(RawMessage::Text("not json".to_string())).is_err());
        assert!(decode(RawMessage::Text(r#"{"data":{}}"#.to_string())).is_err());
        assert!(decode(RawMessage::Text(r#"{"event":"video_frame","data":{}}"#.to_string())).is_err());
    }

    #[test]
    fn test_binary_frame() {
        let bytes = encode_binary(300, -5, true, Some(70), &[0xFF, 0xD8]);
        match decode(RawMessage::Binary(bytes)).unwrap() {
            FeedEvent::Frame(frame) => {
                assert_eq!(frame.sequence_number, 300);
                assert_eq!(frame.capture_timestamp, -5);
                assert!(frame.incident_observed);
                assert_eq!(frame.quality_hint, Some(70));
                assert_eq!(frame.payload, FramePayload::Raw(vec![0xFF, 0xD8]));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let bytes = encode_binary(1, 0, false, None, &[]);
        match decode(RawMessage::Binary(bytes)).unwrap() {
            FeedEvent::Frame(frame) => {
                assert!(!frame.incident_observed);
                assert_eq!(frame.quality_hint, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_short_binary_rejected() {
        let err = decode(RawMessage::Binary(vec![0; 10])).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }
}
