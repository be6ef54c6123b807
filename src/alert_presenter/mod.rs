//! AlertPresenter - Interruptive Alert Presentation
//!
//! ## Responsibilities
//!
//! - React once per alert id: sound, attention request, presentation
//! - Keep one presentation open at a time, queue the rest (FIFO)
//! - Close (hide only) and acknowledge (hide + remote acknowledge)
//! - Sound toggle and per-cue cool-down
//!
//! Sound and attention fire at first observation even when the presentation
//! itself has to wait in the queue. Both run as detached, time-bounded tasks:
//! a stalled audio device or notification backend never delays the
//! presentation or the close/acknowledge controls.

pub mod outputs;

pub use outputs::{BellAudio, ConsoleAlertSurface, LogAttention};

use crate::alert_channel::AlertAcknowledger;
use crate::alert_store::{AlertStateStore, AlertStoreEvent};
use crate::error::Result;
use crate::models::{Alert, SoundCue};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Full-screen alert surface (external)
#[async_trait]
pub trait AlertSurface: Send + Sync {
    async fn show(&self, alert: &Alert);
    async fn hide(&self, alert_id: &str);
}

/// Audio device (external)
#[async_trait]
pub trait AlertAudio: Send + Sync {
    async fn play(&self, cue: SoundCue) -> Result<()>;
}

/// Platform attention request, e.g. a desktop notification (best-effort)
#[async_trait]
pub trait AttentionRequester: Send + Sync {
    async fn request_attention(&self, alert: &Alert) -> Result<()>;
}

/// Upper bound on one sound play or attention request
const OUTPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Presenter settings
#[derive(Debug, Clone)]
pub struct PresenterConfig {
    pub sound_enabled: bool,
    /// Minimum gap between two plays of the same cue
    pub sound_cooldown: Duration,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            sound_cooldown: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct PresenterState {
    seen: HashSet<String>,
    queue: VecDeque<Alert>,
    current: Option<Alert>,
    last_played: HashMap<SoundCue, Instant>,
    sound_enabled: bool,
}

/// AlertPresenter instance
pub struct AlertPresenter {
    store: Arc<AlertStateStore>,
    acknowledger: Arc<dyn AlertAcknowledger>,
    surface: Arc<dyn AlertSurface>,
    audio: Arc<dyn AlertAudio>,
    attention: Arc<dyn AttentionRequester>,
    sound_cooldown: Duration,
    state: Mutex<PresenterState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AlertPresenter {
    /// Create new AlertPresenter
    pub fn new(
        store: Arc<AlertStateStore>,
        acknowledger: Arc<dyn AlertAcknowledger>,
        surface: Arc<dyn AlertSurface>,
        audio: Arc<dyn AlertAudio>,
        attention: Arc<dyn AttentionRequester>,
        config: PresenterConfig,
    ) -> Self {
        Self {
            store,
            acknowledger,
            surface,
            audio,
            attention,
            sound_cooldown: config.sound_cooldown,
            state: Mutex::new(PresenterState {
                sound_enabled: config.sound_enabled,
                ..Default::default()
            }),
            task: Mutex::new(None),
        }
    }

    /// Present pending alerts and follow store changes
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("Alert presenter already running");
            return;
        }

        // Subscribe before the snapshot so nothing falls in between
        let events = self.store.subscribe();
        self.observe_pending().await;

        let presenter = self.clone();
        *task = Some(tokio::spawn(async move {
            presenter.run(events).await;
        }));
        tracing::info!("Alert presenter started");
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    async fn run(&self, mut events: broadcast::Receiver<AlertStoreEvent>) {
        loop {
            match events.recv().await {
                Ok(AlertStoreEvent::Added(alert)) => {
                    self.observe(alert).await;
                }
                Ok(AlertStoreEvent::Acknowledged(alert)) => {
                    self.on_acknowledged(&alert.id).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Presenter lagged, resyncing from store");
                    self.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn observe_pending(&self) {
        for alert in self.store.list_pending().await {
            self.observe(alert).await;
        }
    }

    /// Bring presentations back in line with the store
    ///
    /// Used after missed store events: hides the current alert and drops
    /// queued ones that are no longer pending, then observes whatever is.
    pub async fn resync(&self) {
        let pending = self.store.list_pending().await;
        let pending_ids: HashSet<&str> = pending.iter().map(|a| a.id.as_str()).collect();

        {
            let mut state = self.state.lock().await;
            let before = state.queue.len();
            state.queue.retain(|a| pending_ids.contains(a.id.as_str()));
            let dropped = before - state.queue.len();

            let stale_current = state
                .current
                .as_ref()
                .filter(|a| !pending_ids.contains(a.id.as_str()))
                .map(|a| a.id.clone());
            if let Some(id) = stale_current {
                state.current = None;
                self.surface.hide(&id).await;
                tracing::debug!(alert_id = %id, "Presented alert no longer pending, hidden");
                self.advance(&mut state).await;
            }

            if dropped > 0 {
                tracing::debug!(dropped, "Queued alerts no longer pending, dropped");
            }
        }

        for alert in pending {
            self.observe(alert).await;
        }
    }

    /// React to an alert; returns `true` on its first observation
    ///
    /// The presentation opens (or queues) before sound and attention start.
    pub async fn observe(&self, alert: Alert) -> bool {
        if alert.acknowledged {
            return false;
        }

        let cue = {
            let mut state = self.state.lock().await;
            if !state.seen.insert(alert.id.clone()) {
                return false;
            }

            tracing::info!(alert_id = %alert.id, kind = ?alert.kind, "Presenting new alert");

            let cue = self.claim_sound(&mut state, &alert);

            if state.current.is_none() {
                self.surface.show(&alert).await;
                state.current = Some(alert.clone());
            } else {
                tracing::debug!(alert_id = %alert.id, queued = state.queue.len() + 1, "Presentation queued");
                state.queue.push_back(alert.clone());
            }
            cue
        };

        if let Some(cue) = cue {
            let audio = self.audio.clone();
            let alert_id = alert.id.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(OUTPUT_TIMEOUT, audio.play(cue)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(alert_id = %alert_id, error = %e, "Failed to play alert sound"),
                    Err(_) => tracing::warn!(alert_id = %alert_id, "Alert sound timed out"),
                }
            });
        }

        let attention = self.attention.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(OUTPUT_TIMEOUT, attention.request_attention(&alert)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(alert_id = %alert.id, error = %e, "Attention request failed (ignored)")
                }
                Err(_) => tracing::debug!(alert_id = %alert.id, "Attention request timed out (ignored)"),
            }
        });

        true
    }

    /// Cue to play for a new alert, honouring the toggle and per-cue cool-down
    fn claim_sound(&self, state: &mut PresenterState, alert: &Alert) -> Option<SoundCue> {
        if !state.sound_enabled {
            return None;
        }

        let cue = alert.kind.sound_cue();
        let now = Instant::now();
        let cooling = state
            .last_played
            .get(&cue)
            .is_some_and(|last| now.duration_since(*last) < self.sound_cooldown);

        if cooling {
            tracing::debug!(alert_id = %alert.id, cue = ?cue, "Sound suppressed by cool-down");
            return None;
        }
        state.last_played.insert(cue, now);
        Some(cue)
    }

    /// Hide the current presentation without acknowledging
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(alert) = state.current.take() {
            self.surface.hide(&alert.id).await;
            tracing::debug!(alert_id = %alert.id, "Presentation closed");
            self.advance(&mut state).await;
        }
    }

    /// Acknowledge the current presentation
    ///
    /// On failure the presentation stays open (it can still be closed) and
    /// the error is returned.
    pub async fn acknowledge(&self) -> Result<()> {
        let Some(alert) = self.state.lock().await.current.clone() else {
            return Ok(());
        };

        self.acknowledger.acknowledge(&alert.id).await?;

        self.on_acknowledged(&alert.id).await;
        Ok(())
    }

    /// Alert acknowledged (here or elsewhere): drop its presentation
    async fn on_acknowledged(&self, id: &str) {
        let mut state = self.state.lock().await;
        if state.current.as_ref().is_some_and(|a| a.id == id) {
            state.current = None;
            self.surface.hide(id).await;
            self.advance(&mut state).await;
        } else {
            state.queue.retain(|a| a.id != id);
        }
    }

    /// Show the next queued alert that is still pending
    async fn advance(&self, state: &mut PresenterState) {
        while let Some(next) = state.queue.pop_front() {
            if !self.store.is_pending(&next.id).await {
                tracing::debug!(alert_id = %next.id, "Skipping queued alert, no longer pending");
                continue;
            }
            self.surface.show(&next).await;
            state.current = Some(next);
            return;
        }
    }

    /// Alert currently presented
    pub async fn current(&self) -> Option<Alert> {
        self.state.lock().await.current.clone()
    }

    /// Alerts waiting for presentation
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Badge count
    pub async fn pending_count(&self) -> usize {
        self.store.pending_count().await
    }

    pub async fn set_sound_enabled(&self, enabled: bool) {
        self.state.lock().await.sound_enabled = enabled;
        tracing::info!(enabled, "Alert sound toggled");
    }

    /// Flip the sound setting, returning the new value
    pub async fn toggle_sound(&self) -> bool {
        let mut state = self.state.lock().await;
        state.sound_enabled = !state.sound_enabled;
        tracing::info!(enabled = state.sound_enabled, "Alert sound toggled");
        state.sound_enabled
    }

    pub async fn is_sound_enabled(&self) -> bool {
        self.state.lock().await.sound_enabled
    }
}
