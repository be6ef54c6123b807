//! AlertChannel - Push/Poll Alert Delivery
//!
//! ## Responsibilities
//!
//! - Turn push events (notifications, incidents) into store upserts
//! - Poll the pending set on a fixed interval and reconcile the store
//! - Acknowledge alerts (remote call, then local state)
//! - Fetch the remote notification history
//! - Report poll health as a watch value
//!
//! Both delivery paths end in `AlertStateStore::upsert`, so an alert seen on
//! both paths is stored once. Incident signals closer together than the
//! incident window fold into the incident alert already open, so a feed that
//! keeps flagging frames raises one alert rather than one per frame.

pub mod client;

pub use client::{HistoryQuery, NotificationApi, NotificationClient};

use crate::alert_store::{AlertStateStore, ReconcileSummary, UpsertOutcome};
use crate::error::Result;
use crate::frame_channel::ChannelEvent;
use crate::frame_sequencer::IncidentSignal;
use crate::models::{Alert, AlertSource, NotificationHistory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default gap after which an incident signal starts a new alert
pub const DEFAULT_INCIDENT_WINDOW: Duration = Duration::from_secs(10);

/// Poll path health
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus {
    /// A poll request is in flight
    pub is_polling: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Acknowledges alerts on behalf of the presenter
#[async_trait]
pub trait AlertAcknowledger: Send + Sync {
    async fn acknowledge(&self, id: &str) -> Result<()>;
}

/// Incident alert that later signals fold into
#[derive(Debug, Clone)]
struct OpenIncident {
    /// Timestamp the alert id was derived from
    started: i64,
    /// Latest signal timestamp folded in
    last_seen: i64,
}

/// AlertChannel instance
pub struct AlertChannel {
    api: Arc<dyn NotificationApi>,
    store: Arc<AlertStateStore>,
    poll_interval: Duration,
    incident_window: Duration,
    open_incident: Mutex<Option<OpenIncident>>,
    status: watch::Sender<PollStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertChannel {
    /// Create new AlertChannel
    pub fn new(
        api: Arc<dyn NotificationApi>,
        store: Arc<AlertStateStore>,
        poll_interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(PollStatus::default());
        Self {
            api,
            store,
            poll_interval,
            incident_window: DEFAULT_INCIDENT_WINDOW,
            open_incident: Mutex::new(None),
            status,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Set the incident dedup window (signal timestamps are milliseconds)
    pub fn with_incident_window(mut self, window: Duration) -> Self {
        self.incident_window = window;
        self
    }

    pub fn store(&self) -> &Arc<AlertStateStore> {
        &self.store
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current poll status
    pub fn poll_status(&self) -> PollStatus {
        self.status.borrow().clone()
    }

    pub fn watch_poll_status(&self) -> watch::Receiver<PollStatus> {
        self.status.subscribe()
    }

    /// Push path: alert received on a real-time connection
    pub async fn ingest_push(&self, alert: Alert) -> UpsertOutcome {
        let id = alert.id.clone();
        let outcome = self.store.upsert(alert).await;
        tracing::debug!(alert_id = %id, outcome = ?outcome, "Push alert ingested");
        outcome
    }

    /// Push path: incident observed on the live feed
    ///
    /// A signal within the incident window of the previous one belongs to the
    /// same incident: it can improve the open alert's message but never
    /// raises a second alert, even after the open one was acknowledged.
    pub async fn ingest_incident(&self, signal: &IncidentSignal) -> UpsertOutcome {
        let window = i64::try_from(self.incident_window.as_millis()).unwrap_or(i64::MAX);
        let mut open = self.open_incident.lock().await;

        let started = match open.as_mut() {
            Some(incident) if (signal.timestamp - incident.last_seen).abs() <= window => {
                incident.last_seen = incident.last_seen.max(signal.timestamp);
                incident.started
            }
            _ => {
                *open = Some(OpenIncident {
                    started: signal.timestamp,
                    last_seen: signal.timestamp,
                });
                signal.timestamp
            }
        };

        let alert = Alert::from_incident(started, signal.message.as_deref());
        tracing::debug!(
            alert_id = %alert.id,
            sequence = ?signal.sequence_number,
            folded = started != signal.timestamp,
            "Incident signal ingested"
        );
        self.store.upsert(alert).await
    }

    /// Poll path: fetch the pending set once and reconcile the store
    pub async fn poll_once(&self) -> Result<ReconcileSummary> {
        self.status.send_modify(|s| s.is_polling = true);

        match self.api.pending().await {
            Ok(alerts) => {
                let summary = self.store.reconcile_poll(alerts).await;
                self.status.send_modify(|s| {
                    s.is_polling = false;
                    s.last_error = None;
                    s.last_success_at = Some(Utc::now());
                    s.consecutive_failures = 0;
                });
                if summary != ReconcileSummary::default() {
                    tracing::debug!(
                        inserted = summary.inserted,
                        merged = summary.merged,
                        acknowledged = summary.acknowledged,
                        retired = summary.retired,
                        "Pending alerts reconciled"
                    );
                }
                Ok(summary)
            }
            Err(e) => {
                self.status.send_modify(|s| {
                    s.is_polling = false;
                    s.last_error = Some(e.to_string());
                    s.consecutive_failures += 1;
                });
                tracing::warn!(
                    error = %e,
                    failures = self.status.borrow().consecutive_failures,
                    "Alert poll failed, retrying next tick"
                );
                Err(e)
            }
        }
    }

    /// Acknowledge an alert
    ///
    /// Already-acknowledged ids are a no-op. Locally derived incident alerts
    /// are acknowledged without a remote call. On remote failure the alert
    /// stays pending and the error is returned.
    pub async fn acknowledge(&self, id: &str) -> Result<()> {
        if self.store.is_acknowledged(id).await {
            tracing::debug!(alert_id = %id, "Alert already acknowledged");
            return Ok(());
        }

        let local_only = self
            .store
            .get(id)
            .await
            .is_some_and(|a| a.source == AlertSource::Incident);

        if !local_only {
            if let Err(e) = self.api.acknowledge(id).await {
                tracing::warn!(alert_id = %id, error = %e, "Acknowledge failed, alert stays pending");
                return Err(e);
            }
        }

        self.store.acknowledge(id).await;
        Ok(())
    }

    /// Fetch a page of the remote history and record acknowledged entries locally
    pub async fn fetch_history(&self, query: &HistoryQuery) -> Result<NotificationHistory> {
        let history = self.api.history(query).await?;
        let merged = self.store.merge_history(history.notifications.clone()).await;
        tracing::debug!(
            fetched = history.notifications.len(),
            merged,
            total = history.total,
            "Notification history fetched"
        );
        Ok(history)
    }

    /// Start the poll loop
    pub async fn start_polling(self: &Arc<Self>) {
        let channel = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(channel.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                // Failures are logged and reported through the status
                let _ = channel.poll_once().await;
            }
        });

        self.tasks.lock().await.push(handle);
        tracing::info!(interval_ms = self.poll_interval.as_millis() as u64, "Alert polling started");
    }

    /// Consume push events from a feed channel
    pub async fn attach_feed(self: &Arc<Self>, mut events: broadcast::Receiver<ChannelEvent>) {
        let channel = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Alert(alert)) => {
                        channel.ingest_push(alert).await;
                    }
                    Ok(ChannelEvent::Incident(incident)) => {
                        let signal = IncidentSignal {
                            timestamp: incident.timestamp,
                            sequence_number: None,
                            message: Some(incident.message),
                        };
                        channel.ingest_incident(&signal).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The next poll picks up anything missed
                        tracing::warn!(skipped, "Alert channel lagged behind feed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.tasks.lock().await.push(handle);
    }

    /// Consume incident signals raised by the frame queue
    pub async fn attach_incidents(self: &Arc<Self>, mut incidents: broadcast::Receiver<IncidentSignal>) {
        let channel = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match incidents.recv().await {
                    Ok(signal) => {
                        channel.ingest_incident(&signal).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Incident signals dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.tasks.lock().await.push(handle);
    }

    /// Stop polling and event consumption
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        self.status.send_modify(|s| s.is_polling = false);
        tracing::info!("Alert channel stopped");
    }
}

#[async_trait]
impl AlertAcknowledger for AlertChannel {
    async fn acknowledge(&self, id: &str) -> Result<()> {
        AlertChannel::acknowledge(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::frame_channel::codec::IncidentMessage;
    use crate::models::{AlertKind, Severity};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockApi {
        responses: std::sync::Mutex<VecDeque<Result<Vec<Alert>>>>,
        polls: AtomicUsize,
        acks: std::sync::Mutex<Vec<String>>,
        fail_ack: AtomicBool,
        history: std::sync::Mutex<Vec<Alert>>,
    }

    impl MockApi {
        fn queue(&self, response: Result<Vec<Alert>>) {
            self.responses.lock().unwrap().push_back(response);
        }
    }

    #[async_trait]
    impl NotificationApi for MockApi {
        async fn pending(&self) -> Result<Vec<Alert>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn acknowledge(&self, id: &str) -> Result<()> {
            if self.fail_ack.load(Ordering::SeqCst) {
                return Err(Error::RequestFailure("503 Service Unavailable".to_string()));
            }
            self.acks.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn history(&self, _query: &HistoryQuery) -> Result<NotificationHistory> {
            let notifications = self.history.lock().unwrap().clone();
            Ok(NotificationHistory {
                total: notifications.len() as u64,
                notifications,
            })
        }
    }

    fn remote(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            kind: AlertKind::FireAlert,
            timestamp: 10,
            severity: Severity::High,
            message: "Smoke detected".to_string(),
            acknowledged: false,
            acknowledged_at: None,
            source: AlertSource::Remote,
        }
    }

    fn setup() -> (Arc<MockApi>, Arc<AlertStateStore>, Arc<AlertChannel>) {
        let api = Arc::new(MockApi::default());
        let store = Arc::new(AlertStateStore::default());
        let channel = Arc::new(AlertChannel::new(api.clone(), store.clone(), DEFAULT_POLL_INTERVAL));
        (api, store, channel)
    }

    #[tokio::test]
    async fn test_push_then_poll_converge() {
        let (api, store, channel) = setup();
        assert_eq!(channel.ingest_push(remote("a1")).await, UpsertOutcome::Inserted);

        api.queue(Ok(vec![remote("a1")]));
        let summary = channel.poll_once().await.unwrap();

        assert_eq!(summary.inserted, 0);
        assert_eq!(store.list_pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_failure_reported_then_recovers() {
        let (api, store, channel) = setup();
        api.queue(Err(Error::RequestFailure("timeout".to_string())));
        api.queue(Ok(vec![remote("a1")]));

        assert!(channel.poll_once().await.is_err());
        let status = channel.poll_status();
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.is_some());
        assert!(!status.is_polling);

        channel.poll_once().await.unwrap();
        let status = channel.poll_status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        assert!(status.last_success_at.is_some());
        assert_eq!(store.pending_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_runs_on_interval() {
        let (api, _store, channel) = setup();
        channel.start_polling().await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);

        channel.stop().await;
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_twice_calls_server_once() {
        let (api, store, channel) = setup();
        channel.ingest_push(remote("a1")).await;

        channel.acknowledge("a1").await.unwrap();
        channel.acknowledge("a1").await.unwrap();

        assert_eq!(*api.acks.lock().unwrap(), vec!["a1".to_string()]);
        assert!(!store.is_pending("a1").await);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_keeps_pending() {
        let (api, store, channel) = setup();
        channel.ingest_push(remote("a1")).await;
        api.fail_ack.store(true, Ordering::SeqCst);

        let err = channel.acknowledge("a1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_pending("a1").await);

        // A later poll must not lose it either
        api.queue(Ok(vec![remote("a1")]));
        channel.poll_once().await.unwrap();
        assert!(store.is_pending("a1").await);
    }

    #[tokio::test]
    async fn test_incident_alert_acknowledged_locally() {
        let (api, store, channel) = setup();
        let signal = IncidentSignal {
            timestamp: 77,
            sequence_number: Some(3),
            message: None,
        };
        assert_eq!(channel.ingest_incident(&signal).await, UpsertOutcome::Inserted);
        assert_eq!(channel.ingest_incident(&signal).await, UpsertOutcome::Unchanged);

        channel.acknowledge("incident-77").await.unwrap();
        assert!(api.acks.lock().unwrap().is_empty());
        assert!(store.is_acknowledged("incident-77").await);
    }

    #[tokio::test]
    async fn test_flagged_frame_stream_raises_one_alert() {
        let (_api, store, channel) = setup();
        let queue = crate::frame_sequencer::FrameQueue::new(2);
        let mut incidents = queue.subscribe_incidents();

        // One second of flagged frames at ~30 fps
        for seq in 1..=30u64 {
            let frame = crate::models::Frame::new(
                crate::models::FramePayload::Raw(vec![]),
                seq,
                1_700_000_000_000 + (seq as i64) * 33,
                true,
                None,
            );
            queue.admit(frame).await;
        }
        while let Ok(signal) = incidents.try_recv() {
            channel.ingest_incident(&signal).await;
        }

        let pending = store.list_pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "incident-1700000000033");

        // A message during the same incident improves the open alert
        let signal = IncidentSignal {
            timestamp: 1_700_000_001_200,
            sequence_number: None,
            message: Some("Fire in corridor".to_string()),
        };
        assert_eq!(channel.ingest_incident(&signal).await, UpsertOutcome::Merged);
        assert_eq!(store.pending_count().await, 1);
        assert_eq!(store.list_pending().await[0].kind, AlertKind::FireAlert);

        // Still the same incident after acknowledgement
        channel.acknowledge("incident-1700000000033").await.unwrap();
        let signal = IncidentSignal {
            timestamp: 1_700_000_002_000,
            sequence_number: Some(61),
            message: None,
        };
        assert_eq!(channel.ingest_incident(&signal).await, UpsertOutcome::AlreadyAcknowledged);

        // A quiet gap longer than the window starts a new one
        let signal = IncidentSignal {
            timestamp: 1_700_000_002_000 + DEFAULT_INCIDENT_WINDOW.as_millis() as i64 + 1,
            sequence_number: Some(400),
            message: None,
        };
        assert_eq!(channel.ingest_incident(&signal).await, UpsertOutcome::Inserted);
        assert_eq!(store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_zero_incident_window_keeps_distinct_timestamps() {
        let api = Arc::new(MockApi::default());
        let store = Arc::new(AlertStateStore::default());
        let channel = AlertChannel::new(api, store.clone(), DEFAULT_POLL_INTERVAL)
            .with_incident_window(Duration::ZERO);

        for timestamp in [100, 133, 166] {
            let signal = IncidentSignal {
                timestamp,
                sequence_number: None,
                message: None,
            };
            channel.ingest_incident(&signal).await;
        }
        assert_eq!(store.pending_count().await, 3);
    }

    #[tokio::test]
    async fn test_feed_events_ingested() {
        let (_api, store, channel) = setup();
        let (tx, rx) = broadcast::channel(16);
        channel.attach_feed(rx).await;

        tx.send(ChannelEvent::Connected).unwrap();
        tx.send(ChannelEvent::Alert(remote("p1"))).unwrap();
        tx.send(ChannelEvent::Incident(IncidentMessage {
            timestamp: 5,
            message: "Fire near stove".to_string(),
        }))
        .unwrap();

        for _ in 0..20 {
            if store.pending_count().await == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(store.is_pending("p1").await);
        let incident = store.get("incident-5").await.unwrap();
        assert_eq!(incident.kind, AlertKind::FireAlert);
        assert_eq!(incident.severity, Severity::High);
        channel.stop().await;
    }

    #[tokio::test]
    async fn test_fetch_history_merges_acknowledged() {
        let (api, store, channel) = setup();
        let mut acked = remote("h1");
        acked.acknowledged = true;
        api.history.lock().unwrap().push(acked);

        let history = channel.fetch_history(&HistoryQuery::page(1, 20)).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(store.list_historical(1, 20).await.items[0].id, "h1");
    }
}
