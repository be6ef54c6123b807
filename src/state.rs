//! Application state
//!
//! Configuration plus the shared pipeline components, built once at startup.

use crate::alert_channel::{AlertChannel, NotificationClient};
use crate::alert_presenter::{
    AlertPresenter, BellAudio, ConsoleAlertSurface, LogAttention, PresenterConfig,
};
use crate::alert_store::{AlertStateStore, DEFAULT_HISTORY_CAPACITY};
use crate::error::{Error, Result};
use crate::frame_channel::{ChannelOptions, DiscardFrames, FrameChannel, WsTransport};
use crate::frame_sequencer::{FrameQueue, DEFAULT_CAPACITY};
use crate::incident_client::IncidentClient;
use crate::render_scheduler::{
    FileSurface, ImageDecoder, RenderScheduler, RenderSurface, TracingSurface,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Live feed endpoint (ws:// or wss://)
    pub feed_url: String,
    /// Optional second push connection carrying alert events only
    pub alert_feed_url: Option<String>,
    /// Notification/incident service base URL
    pub api_base_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Buffered frames between the feed and the render loop
    pub frame_buffer_capacity: usize,
    pub alert_poll_interval_ms: u64,
    pub http_timeout_ms: u64,
    pub sound_enabled: bool,
    pub sound_cooldown_ms: u64,
    /// Incident signals closer than this fold into one alert
    pub incident_dedup_ms: u64,
    /// Historical alerts kept in memory
    pub history_capacity: usize,
    /// Write the latest frame here instead of only logging it
    pub frame_output_path: Option<PathBuf>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed_url: std::env::var("FEED_URL")
                .unwrap_or_else(|_| "ws://localhost:5000/feed".to_string()),
            alert_feed_url: env_opt("ALERT_FEED_URL"),
            api_base_url: std::env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5002".to_string()),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", 5),
            reconnect_initial_backoff_ms: env_or("RECONNECT_INITIAL_BACKOFF_MS", 1000),
            reconnect_max_backoff_ms: env_or("RECONNECT_MAX_BACKOFF_MS", 5000),
            handshake_timeout_ms: env_or("HANDSHAKE_TIMEOUT_MS", 20_000),
            frame_buffer_capacity: env_or("FRAME_BUFFER_CAPACITY", DEFAULT_CAPACITY),
            alert_poll_interval_ms: env_or("ALERT_POLL_INTERVAL_MS", 5000),
            http_timeout_ms: env_or("HTTP_TIMEOUT_MS", 10_000),
            sound_enabled: env_flag("SOUND_ENABLED", true),
            sound_cooldown_ms: env_or("SOUND_COOLDOWN_MS", 2000),
            incident_dedup_ms: env_or("INCIDENT_DEDUP_MS", 10_000),
            history_capacity: env_or("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY),
            frame_output_path: env_opt("FRAME_OUTPUT_PATH").map(PathBuf::from),
        }
    }
}

impl AppConfig {
    /// Check values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        for url in std::iter::once(&self.feed_url).chain(self.alert_feed_url.iter()) {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(Error::Config(format!("feed URL must be ws:// or wss://: {}", url)));
            }
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "API_BASE_URL must be http:// or https://: {}",
                self.api_base_url
            )));
        }
        if self.frame_buffer_capacity == 0 {
            return Err(Error::Config("FRAME_BUFFER_CAPACITY must be at least 1".to_string()));
        }
        if self.alert_poll_interval_ms == 0 {
            return Err(Error::Config("ALERT_POLL_INTERVAL_MS must be positive".to_string()));
        }
        if self.reconnect_initial_backoff_ms > self.reconnect_max_backoff_ms {
            return Err(Error::Config(
                "RECONNECT_INITIAL_BACKOFF_MS exceeds RECONNECT_MAX_BACKOFF_MS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            max_reconnect_attempts: self.max_reconnect_attempts,
            initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }

    pub fn presenter_config(&self) -> PresenterConfig {
        PresenterConfig {
            sound_enabled: self.sound_enabled,
            sound_cooldown: Duration::from_millis(self.sound_cooldown_ms),
        }
    }

    pub fn incident_window(&self) -> Duration {
        Duration::from_millis(self.incident_dedup_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.alert_poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Shared pipeline components
#[derive(Clone)]
pub struct ClientState {
    pub config: AppConfig,
    /// FrameQueue (sequencer between feed and render loop)
    pub frames: Arc<FrameQueue>,
    /// FrameChannel (live feed)
    pub feed: Arc<FrameChannel>,
    /// FrameChannel (alert-only push connection)
    pub alert_feed: Option<Arc<FrameChannel>>,
    /// RenderScheduler
    pub renderer: Arc<RenderScheduler>,
    /// AlertStateStore (single alert state)
    pub store: Arc<AlertStateStore>,
    /// AlertChannel (push + poll)
    pub alerts: Arc<AlertChannel>,
    /// AlertPresenter
    pub presenter: Arc<AlertPresenter>,
    /// IncidentClient
    pub incidents: Arc<IncidentClient>,
}

impl ClientState {
    /// Build all components from the config (nothing is started)
    pub fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let frames = Arc::new(FrameQueue::new(config.frame_buffer_capacity));
        let transport = Arc::new(WsTransport::new());

        let feed = Arc::new(FrameChannel::new(
            transport.clone(),
            frames.clone(),
            config.channel_options(),
        ));
        let alert_feed = config.alert_feed_url.as_ref().map(|_| {
            Arc::new(FrameChannel::new(
                transport.clone(),
                Arc::new(DiscardFrames),
                config.channel_options(),
            ))
        });

        let surface: Arc<dyn RenderSurface> = match config.frame_output_path {
            Some(ref path) => Arc::new(FileSurface::new(path.clone())),
            None => Arc::new(TracingSurface::new()),
        };
        let renderer = Arc::new(RenderScheduler::new(
            frames.clone(),
            Arc::new(ImageDecoder),
            surface,
        ));

        let store = Arc::new(AlertStateStore::new(config.history_capacity));
        let api = Arc::new(NotificationClient::with_timeout(
            config.api_base_url.clone(),
            config.http_timeout(),
        )?);
        let alerts = Arc::new(
            AlertChannel::new(api, store.clone(), config.poll_interval())
                .with_incident_window(config.incident_window()),
        );

        let presenter = Arc::new(AlertPresenter::new(
            store.clone(),
            alerts.clone(),
            Arc::new(ConsoleAlertSurface),
            Arc::new(BellAudio),
            Arc::new(LogAttention),
            config.presenter_config(),
        ));

        let incidents = Arc::new(IncidentClient::with_timeout(
            config.api_base_url.clone(),
            config.http_timeout(),
        )?);

        Ok(Self {
            config,
            frames,
            feed,
            alert_feed,
            renderer,
            store,
            alerts,
            presenter,
            incidents,
        })
    }

    /// Start every loop and open the feed connections
    pub async fn start(&self) {
        self.alerts.attach_feed(self.feed.subscribe()).await;
        self.alerts.attach_incidents(self.frames.subscribe_incidents()).await;
        if let Some(ref alert_feed) = self.alert_feed {
            self.alerts.attach_feed(alert_feed.subscribe()).await;
        }

        self.presenter.start().await;
        self.alerts.start_polling().await;
        self.renderer.start().await;

        self.feed.open(&self.config.feed_url).await;
        if let (Some(channel), Some(url)) = (&self.alert_feed, &self.config.alert_feed_url) {
            channel.open(url).await;
        }
    }

    /// Stop everything
    pub async fn shutdown(&self) {
        self.feed.close().await;
        if let Some(ref alert_feed) = self.alert_feed {
            alert_feed.close().await;
        }
        self.renderer.stop().await;
        self.alerts.stop().await;
        self.presenter.stop().await;
    }
}
