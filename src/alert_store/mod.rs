//! AlertStateStore - Pending/Historical Alert State
//!
//! ## Responsibilities
//!
//! - Keep the pending (unacknowledged) alerts, one entry per id
//! - Keep a bounded ring of historical (acknowledged) alerts
//! - Merge push and poll copies of the same alert idempotently
//! - Never un-acknowledge an alert
//! - Publish changes to subscribers
//!
//! The store is the only alert state shared between the push path, the poll
//! path and the presenter. It is created once at startup and injected.
//!
//! Memory: pending alerts and the history ring are bounded by the service and
//! `history_capacity`; the set of acknowledged ids is not (see `StoreInner`).

use crate::models::{Alert, AlertSource};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use tokio::sync::{broadcast, watch, RwLock};

/// Default historical ring capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Store change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStoreEvent {
    /// New pending alert
    Added(Alert),
    /// Alert moved from pending to historical
    Acknowledged(Alert),
}

/// Outcome of `upsert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New pending alert
    Inserted,
    /// Existing pending alert updated with better content
    Merged,
    /// Existing pending alert, nothing new
    Unchanged,
    /// Pending alert reported acknowledged by the source, moved to history
    Acknowledged,
    /// Alert was already acknowledged locally (no-op)
    AlreadyAcknowledged,
    /// Unknown alert that arrived already acknowledged, recorded in history
    HistoryAdded,
}

/// One page of historical alerts, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<Alert>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Result of merging one poll snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub merged: usize,
    pub acknowledged: usize,
    /// Previously polled alerts missing from this snapshot
    pub retired: usize,
}

#[derive(Debug)]
struct PendingEntry {
    alert: Alert,
    /// Seen in at least one poll snapshot
    polled: bool,
}

struct StoreInner {
    pending: Vec<PendingEntry>,
    historical: VecDeque<Alert>,
    history_capacity: usize,
    /// Every id acknowledged during this process's lifetime
    ///
    /// Not capped with the history ring: forgetting an id would let a late
    /// push or poll copy make it pending again. Growth is one id string per
    /// distinct alert, which the process keeps until exit.
    acknowledged_ids: HashSet<String>,
}

impl StoreInner {
    fn position(&self, id: &str) -> Option<usize> {
        self.pending.iter().position(|e| e.alert.id == id)
    }

    fn push_history(&mut self, alert: Alert) {
        if self.historical.iter().any(|a| a.id == alert.id) {
            return;
        }
        if self.historical.len() >= self.history_capacity {
            self.historical.pop_front();
        }
        self.historical.push_back(alert);
    }

    /// Remove from pending and record as acknowledged
    fn retire(&mut self, index: usize, acknowledged_at: Option<chrono::DateTime<Utc>>) -> Alert {
        let mut alert = self.pending.remove(index).alert;
        alert.acknowledged = true;
        alert.acknowledged_at = acknowledged_at.or_else(|| Some(Utc::now()));
        self.acknowledged_ids.insert(alert.id.clone());
        self.push_history(alert.clone());
        alert
    }
}

/// Whether an incoming copy should replace the content of a pending alert
fn improves(existing: &Alert, incoming: &Alert) -> bool {
    match (existing.source, incoming.source) {
        (AlertSource::Incident, AlertSource::Remote) => true,
        (AlertSource::Incident, AlertSource::Incident) => {
            existing.is_placeholder() && !incoming.is_placeholder()
        }
        _ => false,
    }
}

/// AlertStateStore instance
pub struct AlertStateStore {
    inner: RwLock<StoreInner>,
    events: broadcast::Sender<AlertStoreEvent>,
    pending_count: watch::Sender<usize>,
}

impl AlertStateStore {
    /// Create new AlertStateStore
    pub fn new(history_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        let (pending_count, _) = watch::channel(0);
        Self {
            inner: RwLock::new(StoreInner {
                pending: Vec::new(),
                historical: VecDeque::with_capacity(history_capacity.min(1024)),
                history_capacity: history_capacity.max(1),
                acknowledged_ids: HashSet::new(),
            }),
            events,
            pending_count,
        }
    }

    /// Insert or merge an alert
    pub async fn upsert(&self, alert: Alert) -> UpsertOutcome {
        let mut inner = self.inner.write().await;
        let outcome = self.upsert_locked(&mut inner, alert);
        self.publish_count(&inner);
        outcome
    }

    fn upsert_locked(&self, inner: &mut StoreInner, alert: Alert) -> UpsertOutcome {
        if inner.acknowledged_ids.contains(&alert.id) {
            tracing::trace!(alert_id = %alert.id, "Alert already acknowledged, ignoring copy");
            return UpsertOutcome::AlreadyAcknowledged;
        }

        let index = inner.position(&alert.id);

        if alert.acknowledged {
            return match index {
                Some(index) => {
                    let acked = inner.retire(index, alert.acknowledged_at);
                    tracing::info!(alert_id = %acked.id, "Alert acknowledged remotely");
                    let _ = self.events.send(AlertStoreEvent::Acknowledged(acked));
                    UpsertOutcome::Acknowledged
                }
                None => {
                    inner.acknowledged_ids.insert(alert.id.clone());
                    inner.push_history(alert);
                    UpsertOutcome::HistoryAdded
                }
            };
        }

        match index {
            Some(index) => {
                let entry = &mut inner.pending[index];
                if improves(&entry.alert, &alert) {
                    tracing::debug!(alert_id = %alert.id, "Pending alert merged");
                    entry.alert = alert;
                    UpsertOutcome::Merged
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                tracing::info!(
                    alert_id = %alert.id,
                    kind = ?alert.kind,
                    severity = alert.severity.as_str(),
                    "New pending alert"
                );
                inner.pending.push(PendingEntry {
                    alert: alert.clone(),
                    polled: false,
                });
                let _ = self.events.send(AlertStoreEvent::Added(alert));
                UpsertOutcome::Inserted
            }
        }
    }

    /// Move a pending alert to history
    ///
    /// Returns `false` when the id is not pending (already acknowledged or
    /// unknown); that case changes nothing.
    pub async fn acknowledge(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(index) = inner.position(id) else {
            return false;
        };

        let acked = inner.retire(index, None);
        tracing::info!(alert_id = %id, "Alert acknowledged");
        let _ = self.events.send(AlertStoreEvent::Acknowledged(acked));
        self.publish_count(&inner);
        true
    }

    /// Merge one poll snapshot of the pending set
    ///
    /// Alerts seen by an earlier poll and missing from this one were
    /// acknowledged elsewhere; they move to history. Alerts only ever seen
    /// on the push path are left alone.
    pub async fn reconcile_poll(&self, snapshot: Vec<Alert>) -> ReconcileSummary {
        let mut inner = self.inner.write().await;
        let mut summary = ReconcileSummary::default();
        let ids: HashSet<String> = snapshot.iter().map(|a| a.id.clone()).collect();

        for alert in snapshot {
            let id = alert.id.clone();
            match self.upsert_locked(&mut inner, alert) {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Merged => summary.merged += 1,
                UpsertOutcome::Acknowledged => summary.acknowledged += 1,
                _ => {}
            }
            if let Some(index) = inner.position(&id) {
                inner.pending[index].polled = true;
            }
        }

        let missing: Vec<String> = inner
            .pending
            .iter()
            .filter(|e| e.polled && !ids.contains(&e.alert.id))
            .map(|e| e.alert.id.clone())
            .collect();

        for id in missing {
            if let Some(index) = inner.position(&id) {
                let acked = inner.retire(index, None);
                tracing::info!(alert_id = %id, "Alert no longer pending on server, moved to history");
                let _ = self.events.send(AlertStoreEvent::Acknowledged(acked));
                summary.retired += 1;
            }
        }

        self.publish_count(&inner);
        summary
    }

    /// Record acknowledged alerts fetched from the remote history
    pub async fn merge_history(&self, alerts: Vec<Alert>) -> usize {
        let mut inner = self.inner.write().await;
        let mut merged = 0;
        for alert in alerts.into_iter().filter(|a| a.acknowledged) {
            if matches!(
                self.upsert_locked(&mut inner, alert),
                UpsertOutcome::Acknowledged | UpsertOutcome::HistoryAdded
            ) {
                merged += 1;
            }
        }
        self.publish_count(&inner);
        merged
    }

    /// Pending alerts in arrival order
    pub async fn list_pending(&self) -> Vec<Alert> {
        let inner = self.inner.read().await;
        inner.pending.iter().map(|e| e.alert.clone()).collect()
    }

    /// Historical alerts, newest first; `page` is 1-based
    pub async fn list_historical(&self, page: usize, page_size: usize) -> HistoryPage {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let inner = self.inner.read().await;

        let items = inner
            .historical
            .iter()
            .rev()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        HistoryPage {
            items,
            total: inner.historical.len(),
            page,
            page_size,
        }
    }

    /// Look up an alert in pending, then history
    pub async fn get(&self, id: &str) -> Option<Alert> {
        let inner = self.inner.read().await;
        inner
            .pending
            .iter()
            .map(|e| &e.alert)
            .chain(inner.historical.iter())
            .find(|a| a.id == id)
            .cloned()
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.inner.read().await.position(id).is_some()
    }

    pub async fn is_acknowledged(&self, id: &str) -> bool {
        self.inner.read().await.acknowledged_ids.contains(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    /// Pending count as a watch value (badge)
    pub fn watch_pending_count(&self) -> watch::Receiver<usize> {
        self.pending_count.subscribe()
    }

    /// Subscribe to store changes
    pub fn subscribe(&self) -> broadcast::Receiver<AlertStoreEvent> {
        self.events.subscribe()
    }

    fn publish_count(&self, inner: &StoreInner) {
        self.pending_count.send_if_modified(|count| {
            let changed = *count != inner.pending.len();
            *count = inner.pending.len();
            changed
        });
    }
}

impl Default for AlertStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
