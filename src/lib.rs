//! SafeWatch Client Library
//!
//! Live surveillance feed and safety alert delivery client
//!
//! ## Architecture (6 Components)
//!
//! 1. FrameChannel - Live feed connection with reconnect/backoff
//! 2. FrameSequencer - Stale frame rejection and bounded frame buffer
//! 3. RenderScheduler - Single-flight decode/paint loop
//! 4. AlertChannel - Push + poll alert ingestion, acknowledge
//! 5. AlertStateStore - Pending/historical alert state
//! 6. AlertPresenter - Interruptive presentation with sound
//!
//! ## Design Principles
//!
//! - One AlertStateStore per process, injected into its users
//! - broadcast for event families, watch for current-state values
//! - External devices (display, audio, notifications) behind traits

pub mod alert_channel;
pub mod alert_presenter;
pub mod alert_store;
pub mod error;
pub mod frame_channel;
pub mod frame_sequencer;
pub mod incident_client;
pub mod models;
pub mod render_scheduler;
pub mod state;

pub use error::{Error, Result};
pub use state::{AppConfig, ClientState};
