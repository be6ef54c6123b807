//! Shared models and types
//!
//! Types shared between the frame pipeline, the alert stack and the REST
//! clients, kept here to avoid circular dependencies.

use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========================================
// Frames
// ========================================

/// Frame payload as it arrived on the wire
///
/// Base64 text is only decoded when the frame is actually rendered, so frames
/// that are evicted from the buffer never pay for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Base64 text from a JSON envelope
    Encoded(String),
    /// Raw bytes from a binary message
    Raw(Vec<u8>),
}

impl FramePayload {
    /// Consume the payload and return the image bytes
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            FramePayload::Raw(bytes) => Ok(bytes),
            FramePayload::Encoded(text) => {
                // Some producers send a data URL instead of bare base64
                let body = match text.split_once(";base64,") {
                    Some((_, body)) => body,
                    None => text.as_str(),
                };
                Ok(base64::engine::general_purpose::STANDARD.decode(body.trim())?)
            }
        }
    }

    /// Size on the wire in bytes
    pub fn wire_len(&self) -> usize {
        match self {
            FramePayload::Encoded(text) => text.len(),
            FramePayload::Raw(bytes) => bytes.len(),
        }
    }
}

/// One visual sample of the live feed
///
/// Not `Clone`: a frame is owned by the sequencer until it is handed to the
/// render step, then moved into the decoder.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub payload: FramePayload,
    pub sequence_number: u64,
    pub capture_timestamp: i64,
    pub incident_observed: bool,
    /// Encoder quality 0-100, when the source reports it
    pub quality_hint: Option<u8>,
}

impl Frame {
    /// Build a frame, dropping out-of-range quality hints
    pub fn new(
        payload: FramePayload,
        sequence_number: u64,
        capture_timestamp: i64,
        incident_observed: bool,
        quality_hint: Option<u8>,
    ) -> Self {
        Self {
            payload,
            sequence_number,
            capture_timestamp,
            incident_observed,
            quality_hint: quality_hint.filter(|q| *q <= 100),
        }
    }
}

// ========================================
// Alerts
// ========================================

/// Alert kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FireAlert,
    FallAlert,
    TestAlert,
}

impl AlertKind {
    /// Human-readable title used for attention requests and the overlay
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::FireAlert => "Fire Alert",
            AlertKind::FallAlert => "Fall Alert",
            AlertKind::TestAlert => "Test Alert",
        }
    }

    /// Icon shown with attention requests
    pub fn icon(&self) -> &'static str {
        match self {
            AlertKind::FireAlert => "fire-icon.png",
            AlertKind::FallAlert => "fall-icon.png",
            AlertKind::TestAlert => "test-icon.png",
        }
    }

    /// Sound cue for this kind (test alerts share the fall cue)
    pub fn sound_cue(&self) -> SoundCue {
        match self {
            AlertKind::FireAlert => SoundCue::Fire,
            AlertKind::FallAlert | AlertKind::TestAlert => SoundCue::Fall,
        }
    }
}

/// Audio cue played on a new alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundCue {
    Fire,
    Fall,
}

impl SoundCue {
    /// Asset name of the cue
    pub fn asset(&self) -> &'static str {
        match self {
            SoundCue::Fire => "fire_alert.wav",
            SoundCue::Fall => "fall_alert.wav",
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Where an alert came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    /// Known to the notification service (push event or poll response)
    Remote,
    /// Derived locally from an incident signal on the feed
    Incident,
}

/// Message of an incident alert raised without any text (frame flag only)
pub const INCIDENT_DEFAULT_MESSAGE: &str = "Incident detected on live feed";

/// Safety alert
///
/// Identity is `id`. Everything except the acknowledgement fields is fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub timestamp: i64,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub source: AlertSource,
}

impl Alert {
    /// Incident alert still carrying the placeholder message
    pub fn is_placeholder(&self) -> bool {
        self.source == AlertSource::Incident && self.message == INCIDENT_DEFAULT_MESSAGE
    }

    /// Attention-request body text
    pub fn body(&self) -> String {
        format!(
            "Message: {}\nSeverity: {}",
            self.message,
            self.severity.as_str().to_uppercase()
        )
    }

    /// Build the alert raised for an incident observed on the feed
    ///
    /// The id depends only on the timestamp so that a frame flag and an
    /// incident message describing the same moment collapse into one alert.
    pub fn from_incident(timestamp: i64, message: Option<&str>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(INCIDENT_DEFAULT_MESSAGE)
            .to_string();
        let kind = if message.to_lowercase().contains("fire") {
            AlertKind::FireAlert
        } else {
            AlertKind::FallAlert
        };

        Self {
            id: format!("incident-{}", timestamp),
            kind,
            timestamp,
            severity: Severity::High,
            message,
            acknowledged: false,
            acknowledged_at: None,
            source: AlertSource::Incident,
        }
    }
}

/// Alert payload body as sent by the notification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecordData {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Option<Severity>,
}

/// Alert as sent by the notification service (REST and push)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub timestamp: i64,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub ack_time: Option<DateTime<Utc>>,
    pub data: AlertRecordData,
}

impl From<AlertRecord> for Alert {
    fn from(record: AlertRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            timestamp: record.timestamp,
            severity: record.data.severity.unwrap_or_default(),
            message: record.data.message,
            acknowledged: record.acknowledged,
            acknowledged_at: record.ack_time,
            source: AlertSource::Remote,
        }
    }
}

impl From<&Alert> for AlertRecord {
    fn from(alert: &Alert) -> Self {
        Self {
            id: alert.id.clone(),
            kind: alert.kind,
            timestamp: alert.timestamp,
            acknowledged: alert.acknowledged,
            ack_time: alert.acknowledged_at,
            data: AlertRecordData {
                message: alert.message.clone(),
                severity: Some(alert.severity),
            },
        }
    }
}

/// Convert a JSON array of alert records, skipping records that do not parse
///
/// One malformed record must not hide the others from the poll path.
pub fn parse_alert_records(values: Vec<serde_json::Value>) -> Vec<Alert> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<AlertRecord>(value) {
            Ok(record) => Some(Alert::from(record)),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed alert record");
                None
            }
        })
        .collect()
}

/// Notification history page from the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistoryResponse {
    #[serde(default)]
    pub notifications: Vec<serde_json::Value>,
    #[serde(default)]
    pub total: u64,
}

/// Notification history page, parsed
#[derive(Debug, Clone)]
pub struct NotificationHistory {
    pub notifications: Vec<Alert>,
    pub total: u64,
}

// ========================================
// Incidents
// ========================================

/// Incident summary (`GET /api/incidents`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub uuid: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub image_path: Option<String>,
}

/// Incident detail (`GET /api/incidents/{id}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDetail {
    pub uuid: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(default)]
    pub confidence: f64,
    /// File name resolvable via `/api/incidents/files/{image}`
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Parse an incident timestamp (RFC3339, with a naive fallback)
pub fn parse_incident_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Parse(format!("invalid incident timestamp {:?}: {}", raw, e)))
}
