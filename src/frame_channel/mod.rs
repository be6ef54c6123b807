//! FrameChannel - Live Feed Connection
//!
//! ## Responsibilities
//!
//! - Keep a persistent connection to the feed source
//! - Decode feed messages and hand frames to the frame sink
//! - Publish connection state and lifecycle events
//! - Reconnect with capped exponential backoff; give up after
//!   `max_reconnect_attempts` consecutive failures
//!
//! Every disconnect clears the sink's buffered frames before a new
//! connection is attempted.

pub mod codec;
pub mod transport;

pub use codec::{FeedEvent, FeedMessage, FrameMessage, IncidentMessage, RawMessage};
pub use transport::{FeedConnection, FeedTransport, WsTransport};

use crate::error::Error;
use crate::models::{Alert, Frame};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receives frames from a channel
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn on_frame(&self, frame: Frame);
    /// The stream was interrupted; buffered state is no longer continuous
    async fn on_stream_gap(&self);
}

/// Sink for channels that only carry alert events
#[derive(Debug, Default)]
pub struct DiscardFrames;

#[async_trait]
impl FrameSink for DiscardFrames {
    async fn on_frame(&self, frame: Frame) {
        tracing::trace!(sequence = frame.sequence_number, "Discarding frame on alert-only channel");
    }

    async fn on_stream_gap(&self) {}
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Reconnection tunables
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(5000),
            handshake_timeout: Duration::from_millis(20_000),
        }
    }
}

impl ChannelOptions {
    /// Delay after `failures` consecutive failures (1-based), doubling from
    /// the initial backoff and capped at the maximum
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

/// Channel error report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    pub detail: String,
    /// True when the channel gave up and is now terminally disconnected
    pub fatal: bool,
}

/// Channel lifecycle and push events
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Error(ChannelError),
    Incident(IncidentMessage),
    Alert(Alert),
}

/// Why a connection ended
enum ConnectionEnd {
    PeerClosed,
    Failed(Error),
}

impl ConnectionEnd {
    fn reason(&self) -> String {
        match self {
            ConnectionEnd::PeerClosed => "closed by server".to_string(),
            ConnectionEnd::Failed(e) => e.to_string(),
        }
    }
}

/// Shared pieces the connection loop needs
#[derive(Clone)]
struct ChannelContext {
    transport: Arc<dyn FeedTransport>,
    sink: Arc<dyn FrameSink>,
    options: ChannelOptions,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<ChannelEvent>,
}

impl ChannelContext {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ChannelEvent) {
        // Zero subscribers is fine
        let _ = self.events.send(event);
    }
}

/// FrameChannel instance
pub struct FrameChannel {
    ctx: ChannelContext,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FrameChannel {
    /// Create new FrameChannel
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        sink: Arc<dyn FrameSink>,
        options: ChannelOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);

        Self {
            ctx: ChannelContext {
                transport,
                sink,
                options,
                state: Arc::new(state),
                events,
            },
            task: Mutex::new(None),
        }
    }

    /// Open the channel (restarts it if already open or terminally closed)
    pub async fn open(&self, endpoint: &str) {
        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
            self.ctx.sink.on_stream_gap().await;
        }

        let ctx = self.ctx.clone();
        let endpoint = endpoint.to_string();
        ctx.set_state(ConnectionState::Connecting);
        *task = Some(tokio::spawn(run_channel(ctx, endpoint)));
    }

    /// Close the channel, cancelling any pending reconnect
    pub async fn close(&self) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        handle.abort();
        self.ctx.sink.on_stream_gap().await;
        self.ctx.set_state(ConnectionState::Disconnected);
        self.ctx.emit(ChannelEvent::Disconnected {
            reason: "closed by client".to_string(),
        });
        tracing::info!("Feed channel closed");
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.ctx.state.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state.subscribe()
    }

    /// Subscribe to lifecycle and push events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.ctx.events.subscribe()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.ctx.options
    }
}

/// Connection loop: connect, pump messages, back off, repeat
async fn run_channel(ctx: ChannelContext, endpoint: String) {
    let mut failures: u32 = 0;

    loop {
        let session = Uuid::new_v4();
        let connect = ctx.transport.connect(&endpoint);

        let outcome = match tokio::time::timeout(ctx.options.handshake_timeout, connect).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::HandshakeTimeout(ctx.options.handshake_timeout)),
        };

        match outcome {
            Ok(connection) => {
                failures = 0;
                ctx.set_state(ConnectionState::Connected);
                ctx.emit(ChannelEvent::Connected);
                tracing::info!(session = %session, endpoint = %endpoint, "Feed connected");

                let end = pump(&ctx, connection).await;
                let reason = end.reason();

                ctx.sink.on_stream_gap().await;
                ctx.emit(ChannelEvent::Disconnected {
                    reason: reason.clone(),
                });
                tracing::warn!(session = %session, reason = %reason, "Feed disconnected");
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    endpoint = %endpoint,
                    attempt = failures,
                    error = %e,
                    "Feed connection attempt failed"
                );

                if failures >= ctx.options.max_reconnect_attempts {
                    let terminal = Error::TerminalConnection {
                        attempts: failures,
                        message: e.to_string(),
                    };
                    tracing::error!(endpoint = %endpoint, error = %terminal, "Giving up on feed");
                    ctx.set_state(ConnectionState::Disconnected);
                    ctx.emit(ChannelEvent::Error(ChannelError {
                        detail: terminal.to_string(),
                        fatal: true,
                    }));
                    return;
                }

                ctx.emit(ChannelEvent::Error(ChannelError {
                    detail: e.to_string(),
                    fatal: false,
                }));
            }
        }

        let attempt = failures + 1;
        let delay = ctx.options.backoff_for(failures.max(1));
        ctx.set_state(ConnectionState::Reconnecting { attempt });
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Read messages until the connection ends
async fn pump(ctx: &ChannelContext, mut connection: Box<dyn FeedConnection>) -> ConnectionEnd {
    while let Some(message) = connection.next_message().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => return ConnectionEnd::Failed(e),
        };

        match codec::decode(message) {
            Ok(FeedEvent::Frame(frame)) => ctx.sink.on_frame(frame).await,
            Ok(FeedEvent::Incident(incident)) => {
                tracing::warn!(
                    timestamp = incident.timestamp,
                    text = %incident.message,
                    "Incident pushed on feed"
                );
                ctx.emit(ChannelEvent::Incident(incident));
            }
            Ok(FeedEvent::Alert(alert)) => {
                tracing::info!(alert_id = %alert.id, kind = ?alert.kind, "Alert pushed on feed");
                ctx.emit(ChannelEvent::Alert(alert));
            }
            Ok(FeedEvent::Ignored(name)) => {
                tracing::debug!(event = %name, "Ignoring unhandled feed event");
            }
            Err(e) => {
                // A bad message does not invalidate the connection
                tracing::warn!(error = %e, "Malformed feed message");
                ctx.emit(ChannelEvent::Error(ChannelError {
                    detail: e.to_string(),
                    fatal: false,
                }));
            }
        }
    }

    ConnectionEnd::PeerClosed
}
