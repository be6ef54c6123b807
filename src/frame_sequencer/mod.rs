//! FrameSequencer - Frame Admission and Bounded Buffer
//!
//! ## Responsibilities
//!
//! - Reject frames whose sequence number does not move forward
//! - Keep a small FIFO of admitted frames (oldest evicted on overflow)
//! - Hand frames to the render loop one at a time
//! - Raise incident signals for admitted frames flagged by the source
//!
//! The pure `FrameSequencer` holds the ordering rules; `FrameQueue` wraps it
//! for the channel (producer) and the render loop (consumer).

use crate::frame_channel::FrameSink;
use crate::models::Frame;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{broadcast, Mutex, Notify};

/// Default number of buffered frames
pub const DEFAULT_CAPACITY: usize = 2;

/// Outcome of `admit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitResult {
    Accepted,
    /// Sequence number not greater than the last accepted one (dropped silently)
    RejectedStale,
}

/// Incident observed on the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentSignal {
    pub timestamp: i64,
    /// Sequence number of the flagged frame (None for incident messages)
    pub sequence_number: Option<u64>,
    pub message: Option<String>,
}

/// Sequencer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub accepted: u64,
    pub rejected_stale: u64,
    pub evicted: u64,
    pub cleared: u64,
}

/// Ordering rules and bounded buffer
#[derive(Debug)]
pub struct FrameSequencer {
    queue: VecDeque<Frame>,
    capacity: usize,
    last_accepted: Option<u64>,
    stats: SequencerStats,
}

impl FrameSequencer {
    /// Create a sequencer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            last_accepted: None,
            stats: SequencerStats::default(),
        }
    }

    /// Admit a frame
    pub fn admit(&mut self, frame: Frame) -> AdmitResult {
        if let Some(last) = self.last_accepted {
            if frame.sequence_number <= last {
                self.stats.rejected_stale += 1;
                return AdmitResult::RejectedStale;
            }
        }

        self.last_accepted = Some(frame.sequence_number);

        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                self.stats.evicted += 1;
                tracing::trace!(sequence = dropped.sequence_number, "Evicted oldest buffered frame");
            }
        }
        self.queue.push_back(frame);
        self.stats.accepted += 1;

        AdmitResult::Accepted
    }

    /// Pop the oldest buffered frame
    pub fn take_next(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Drop buffered frames, keeping the sequencing baseline
    pub fn drain(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Start a new stream epoch: drop buffered frames and forget the baseline
    ///
    /// After a gap the source may restart numbering (a restarted encoder
    /// counts from 1 again). Keeping the old baseline would reject every
    /// frame of the new stream until it passed the old high-water mark, so
    /// strict ordering holds within one connection epoch, not across them.
    pub fn reset(&mut self) -> usize {
        let dropped = self.drain();
        self.last_accepted = None;
        self.stats.cleared += 1;
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    /// Sequence numbers currently buffered, oldest first
    pub fn buffered_sequences(&self) -> Vec<u64> {
        self.queue.iter().map(|f| f.sequence_number).collect()
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Shared frame queue between the feed channel and the render loop
pub struct FrameQueue {
    sequencer: Mutex<FrameSequencer>,
    ready: Notify,
    incidents: broadcast::Sender<IncidentSignal>,
}

impl FrameQueue {
    /// Create new FrameQueue
    pub fn new(capacity: usize) -> Self {
        let (incidents, _) = broadcast::channel(64);
        Self {
            sequencer: Mutex::new(FrameSequencer::new(capacity)),
            ready: Notify::new(),
            incidents,
        }
    }

    /// Admit a frame; flagged frames raise an incident signal when accepted
    pub async fn admit(&self, frame: Frame) -> AdmitResult {
        let sequence = frame.sequence_number;
        let incident = frame
            .incident_observed
            .then_some(frame.capture_timestamp);

        let result = self.sequencer.lock().await.admit(frame);

        match result {
            AdmitResult::Accepted => {
                if let Some(timestamp) = incident {
                    tracing::warn!(sequence, timestamp, "Incident flagged on live frame");
                    // No receivers just means nobody is listening for alerts yet
                    let _ = self.incidents.send(IncidentSignal {
                        timestamp,
                        sequence_number: Some(sequence),
                        message: None,
                    });
                }
                self.ready.notify_one();
            }
            AdmitResult::RejectedStale => {
                tracing::trace!(sequence, "Rejected stale frame");
            }
        }

        result
    }

    /// Pop the next frame for rendering
    pub async fn take_next(&self) -> Option<Frame> {
        self.sequencer.lock().await.take_next()
    }

    /// Wait until a frame may be available
    pub async fn frame_ready(&self) {
        self.ready.notified().await
    }

    /// Drop buffered frames (render loop paused or resumed)
    pub async fn drain(&self) -> usize {
        self.sequencer.lock().await.drain()
    }

    /// Drop buffered frames and the sequencing baseline (stream gap)
    ///
    /// Called on every disconnect. Frames numbered at or below the previous
    /// epoch's high-water mark are admitted again afterwards; see
    /// [`FrameSequencer::reset`].
    pub async fn reset(&self) -> usize {
        let dropped = self.sequencer.lock().await.reset();
        tracing::debug!(dropped, "Frame buffer reset after stream gap");
        dropped
    }

    pub async fn len(&self) -> usize {
        self.sequencer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sequencer.lock().await.is_empty()
    }

    pub async fn buffered_sequences(&self) -> Vec<u64> {
        self.sequencer.lock().await.buffered_sequences()
    }

    pub async fn stats(&self) -> SequencerStats {
        self.sequencer.lock().await.stats()
    }

    /// Subscribe to incident signals raised on admission
    pub fn subscribe_incidents(&self) -> broadcast::Receiver<IncidentSignal> {
        self.incidents.subscribe()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl FrameSink for FrameQueue {
    async fn on_frame(&self, frame: Frame) {
        self.admit(frame).await;
    }

    async fn on_stream_gap(&self) {
        self.reset().await;
    }
}
