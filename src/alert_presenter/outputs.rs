//! Terminal outputs for the presenter
//!
//! Headless stand-ins for the full-screen overlay, the audio device and
//! desktop notifications.

use super::{AlertAudio, AlertSurface, AttentionRequester};
use crate::error::Result;
use crate::models::{Alert, SoundCue};
use async_trait::async_trait;
use std::io::Write;

/// Logs alert presentations
#[derive(Debug, Clone, Default)]
pub struct ConsoleAlertSurface;

#[async_trait]
impl AlertSurface for ConsoleAlertSurface {
    async fn show(&self, alert: &Alert) {
        tracing::warn!(
            alert_id = %alert.id,
            severity = alert.severity.as_str(),
            timestamp = alert.timestamp,
            "{}: {}",
            alert.kind.title(),
            alert.message
        );
    }

    async fn hide(&self, alert_id: &str) {
        tracing::info!(alert_id = %alert_id, "Alert dismissed");
    }
}

/// Rings the terminal bell
#[derive(Debug, Clone, Default)]
pub struct BellAudio;

#[async_trait]
impl AlertAudio for BellAudio {
    async fn play(&self, cue: SoundCue) -> Result<()> {
        tracing::debug!(asset = cue.asset(), "Playing alert sound");
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Logs attention requests
#[derive(Debug, Clone, Default)]
pub struct LogAttention;

#[async_trait]
impl AttentionRequester for LogAttention {
    async fn request_attention(&self, alert: &Alert) -> Result<()> {
        tracing::info!(
            alert_id = %alert.id,
            icon = alert.kind.icon(),
            title = alert.kind.title(),
            body = %alert.body(),
            "Attention requested"
        );
        Ok(())
    }
}
