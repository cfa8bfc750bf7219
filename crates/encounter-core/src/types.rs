//! Shared types and OpenAPI schemas.
//!
//! Views returned by the tracker facade. Domain types live in their own
//! modules (friends, encounter, sink).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::encounter::EncounterRecord;
use crate::friends::Friend;
use crate::thresholds::Thresholds;

/// Outcome of processing one trigger batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchSummary {
    /// Raw triggers delivered.
    #[schema(example = 3)]
    pub received: usize,

    /// Triggers that became beacon events and were applied.
    #[schema(example = 2)]
    pub applied: usize,

    /// Triggers dropped by classification.
    #[schema(example = 1)]
    pub skipped: usize,

    /// Events whose update failed and was logged.
    #[schema(example = 0)]
    pub failed: usize,
}

/// Read-only view of the tracker for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackerStatus {
    /// Friend directory in list order.
    pub friends: Vec<Friend>,

    /// Thresholds in force.
    pub thresholds: Thresholds,

    /// Every open encounter, as persisted.
    pub encounters: Vec<EncounterRecord>,

    /// Deadline the alarm is armed for.
    pub pending_wake: Option<DateTime<Utc>>,

    /// Records waiting in the outbound queue.
    pub queued_events: usize,
}
