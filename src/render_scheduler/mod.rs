//! RenderScheduler - Single-Flight Render Loop
//!
//! ## Responsibilities
//!
//! - Pull one frame at a time from the frame queue
//! - Decode it off the async critical path, then paint it
//! - Only start the next cycle after the previous paint finished
//! - Pause/resume: pausing clears the queue and blanks the surface
//!
//! A decode that is running when the loop is paused completes, but its
//! result is not painted.

pub mod surface;

pub use surface::{FileSurface, TracingSurface};

use crate::error::{Error, Result};
use crate::frame_sequencer::FrameQueue;
use crate::models::Frame;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// A decoded frame ready to paint
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub sequence_number: u64,
    pub capture_timestamp: i64,
    pub quality_hint: Option<u8>,
    pub image: DynamicImage,
}

/// Turns frame payloads into images
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(&self, frame: Frame) -> Result<DecodedFrame>;
}

/// Display surface (external)
#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn paint(&self, frame: DecodedFrame) -> Result<()>;
    /// Blank the surface (stream paused)
    async fn clear(&self);
}

/// JPEG/PNG decoder running on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct ImageDecoder;

#[async_trait]
impl FrameDecoder for ImageDecoder {
    async fn decode(&self, frame: Frame) -> Result<DecodedFrame> {
        let sequence = frame.sequence_number;
        let capture_timestamp = frame.capture_timestamp;
        let quality_hint = frame.quality_hint;

        let image = tokio::task::spawn_blocking(move || -> Result<DynamicImage> {
            let bytes = frame.payload.into_bytes()?;
            Ok(image::load_from_memory(&bytes)?)
        })
        .await
        .map_err(|e| Error::Internal(format!("decode task failed: {}", e)))?
        .map_err(|e| Error::DecodeFailure {
            sequence,
            message: e.to_string(),
        })?;

        Ok(DecodedFrame {
            sequence_number: sequence,
            capture_timestamp,
            quality_hint,
            image,
        })
    }
}

/// Render loop counters
#[derive(Debug, Default)]
struct RenderCounters {
    rendered: AtomicU64,
    decode_failures: AtomicU64,
    paint_failures: AtomicU64,
    skipped_while_paused: AtomicU64,
}

/// Render loop statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: u64,
    pub decode_failures: u64,
    pub paint_failures: u64,
    pub skipped_while_paused: u64,
}

/// RenderScheduler instance
pub struct RenderScheduler {
    queue: Arc<FrameQueue>,
    decoder: Arc<dyn FrameDecoder>,
    surface: Arc<dyn RenderSurface>,
    enabled: watch::Sender<bool>,
    counters: RenderCounters,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RenderScheduler {
    /// Create new RenderScheduler (enabled, not started)
    pub fn new(
        queue: Arc<FrameQueue>,
        decoder: Arc<dyn FrameDecoder>,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        let (enabled, _) = watch::channel(true);
        Self {
            queue,
            decoder,
            surface,
            enabled,
            counters: RenderCounters::default(),
            task: Mutex::new(None),
        }
    }

    /// Start the render loop
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("Render loop already running");
            return;
        }

        let scheduler = self.clone();
        *task = Some(tokio::spawn(async move {
            scheduler.run().await;
        }));
        tracing::info!("Render loop started");
    }

    /// Stop the render loop
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            tracing::info!("Render loop stopped");
        }
    }

    /// Pause or resume rendering
    ///
    /// Both directions drop buffered frames: pausing must not decode them
    /// later, and resuming starts from fresh frames only.
    pub async fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.send_replace(enabled);
        let dropped = self.queue.drain().await;

        if !enabled {
            self.surface.clear().await;
        }

        if was_enabled != enabled {
            tracing::info!(enabled, dropped, "Render loop {}", if enabled { "resumed" } else { "paused" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            rendered: self.counters.rendered.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            paint_failures: self.counters.paint_failures.load(Ordering::Relaxed),
            skipped_while_paused: self.counters.skipped_while_paused.load(Ordering::Relaxed),
        }
    }

    async fn run(&self) {
        let mut enabled = self.enabled.subscribe();

        loop {
            if !*enabled.borrow_and_update() {
                if enabled.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let Some(frame) = self.queue.take_next().await else {
                tokio::select! {
                    _ = self.queue.frame_ready() => {}
                    changed = enabled.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue;
            };

            self.render_cycle(frame).await;

            // Let producers run between cycles
            tokio::task::yield_now().await;
        }
    }

    /// One cycle: decode, then paint if still enabled
    async fn render_cycle(&self, frame: Frame) {
        let sequence = frame.sequence_number;

        // A pause can land between the loop's check and `take_next`
        if !self.is_enabled() {
            self.counters.skipped_while_paused.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sequence, "Paused before decode, frame dropped");
            return;
        }

        let decoded = match self.decoder.decode(frame).await {
            Ok(decoded) => decoded,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(sequence, error = %e, "Frame decode failed, skipping");
                return;
            }
        };

        if !self.is_enabled() {
            self.counters.skipped_while_paused.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sequence, "Paused during decode, frame not painted");
            return;
        }

        match self.surface.paint(decoded).await {
            Ok(()) => {
                self.counters.rendered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sequence, "Frame painted");
            }
            Err(e) => {
                self.counters.paint_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(sequence, error = %e, "Frame paint failed");
            }
        }
    }
}
