//! # encounter-core
//!
//! Core business logic for detecting proximity encounters with beacon-tagged friends.
//!
//! This crate provides:
//! - Friend identity resolution from beacon major/minor ids
//! - Classification of raw detection triggers into enter/exit beacon events
//! - A per-friend encounter state machine (TRANSIENT → ACTUAL → ended) with
//!   gap statistics
//! - Single-alarm wake-up scheduling and an at-least-once outbound event queue
//! - Persistent thresholds, snapshots and configuration
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`friends`] - Friend directory parsed from a CSV configuration string
//! - [`classifier`] - Raw trigger batches and their classification
//! - [`thresholds`] - The four durations governing the state machine
//! - [`encounter`] - A single encounter and its transition rules
//! - [`engine`] - The friend → encounter table, restore and snapshot
//! - [`scheduler`] - Coalescing deadlines onto one host alarm
//! - [`sink`] - Outbound lifecycle records and their queue
//! - [`tracker`] - The locked facade tying everything to storage and host hooks
//! - [`storage`] - Durable key/value storage
//! - [`config`] - Process configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared views and OpenAPI schemas
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use encounter_core::{
//!     Direction, EncounterTracker, Friend, MemoryStore, NoAlarm, Notifier, TriggerBatch,
//! };
//!
//! struct Silent;
//!
//! impl Notifier for Silent {
//!     fn notify(&self, _direction: Direction, _friend: &Friend) {}
//! }
//!
//! let tracker = EncounterTracker::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoAlarm),
//!     Arc::new(Silent),
//! );
//! tracker.set_friend_list("Sam-100-200, Lee-100-300", Utc::now()).unwrap();
//! tracker.start(Utc::now());
//!
//! let summary = tracker.handle_batch(TriggerBatch::new(Vec::new()), Utc::now());
//! assert_eq!(summary.received, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod classifier;
pub mod config;
pub mod encounter;
pub mod engine;
pub mod error;
pub mod friends;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod thresholds;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use classifier::{classify, BeaconEvent, Direction, RawTrigger, SkipReason, TriggerBatch};
pub use config::{Config, ConfigError, ConfigResult, LoggingConfig, ServerConfig, StorageConfig};
pub use encounter::{EndReason, Encounter, EncounterRecord, GapStats, Phase};
pub use engine::{EncounterEngine, Lifecycle};
pub use error::{EncounterError, Result};
pub use friends::{Friend, FriendDirectory};
pub use scheduler::{AlarmClock, NoAlarm, WakeDecision, WakeScheduler};
pub use sink::{EncounterReport, EventSink, MessageRecord, OutboundEvent};
pub use storage::{default_data_dir, JsonFileStore, KeyValueStore, MemoryStore};
pub use thresholds::{Threshold, ThresholdStore, Thresholds};
pub use tracker::{EncounterTracker, Notifier};
pub use types::{BatchSummary, TrackerStatus};
