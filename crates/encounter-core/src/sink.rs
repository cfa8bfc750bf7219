//! Outbound lifecycle events and the queue the downstream consumer drains.
//!
//! Records are appended in emission order and handed out by an atomic
//! "fetch and clear". The backlog is persisted after every append and drain,
//! so a record is delivered at least once even across restarts.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::encounter::{EndReason, Encounter};
use crate::error::Result;
use crate::storage::{KeyValueStore, EVENT_QUEUE_KEY};
use crate::thresholds::Thresholds;

/// Encounter details shared by the four lifecycle records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EncounterReport {
    /// Unique id for de-duplication by at-least-once consumers.
    pub event_id: Uuid,

    /// Start or end instant, depending on the record type.
    pub timestamp: DateTime<Utc>,

    /// Friend name.
    pub friend_name: String,

    /// The friend's beacon tag.
    pub kontakt_beacon_id: String,

    /// Threshold in force when the record was emitted.
    pub min_duration_secs: u64,

    /// Threshold in force when the record was emitted.
    pub actual_enc_timeout_secs: u64,

    /// Threshold in force when the record was emitted.
    pub transient_enc_timeout_secs: u64,

    /// Largest gap between detection events in seconds, `-1` when there were none.
    pub max_detect_event_delta_t: f64,

    /// Number of gap samples.
    pub num_events: u32,

    /// Mean gap in seconds; present only when `num_events > 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_detect_event_delta_t: Option<f64>,

    /// Standard deviation of the gaps; present only when `num_events > 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_detect_event_delta_t: Option<f64>,

    /// When the participant was notified (start of actual encounters only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notif_at: Option<DateTime<Utc>>,

    /// Why the encounter ended (end records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

impl EncounterReport {
    /// Describe `encounter` as of `timestamp`.
    #[must_use]
    pub fn new(encounter: &Encounter, thresholds: &Thresholds, timestamp: DateTime<Utc>) -> Self {
        let stats = encounter.stats();
        Self {
            event_id: Uuid::now_v7(),
            timestamp,
            friend_name: encounter.friend().name.clone(),
            kontakt_beacon_id: encounter.friend().tag.clone(),
            min_duration_secs: thresholds.min_duration_secs,
            actual_enc_timeout_secs: thresholds.actual_timeout_secs,
            transient_enc_timeout_secs: thresholds.transient_timeout_secs,
            max_detect_event_delta_t: stats.max.unwrap_or(-1.0),
            num_events: stats.count,
            avg_detect_event_delta_t: stats.mean(),
            sd_detect_event_delta_t: stats.std_dev(),
            notif_at: None,
            end_reason: None,
        }
    }

    #[must_use]
    fn with_notif_at(mut self, at: DateTime<Utc>) -> Self {
        self.notif_at = Some(at);
        self
    }

    #[must_use]
    fn with_end_reason(mut self, reason: EndReason) -> Self {
        self.end_reason = Some(reason);
        self
    }
}

/// A free-text operational message for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MessageRecord {
    /// Unique id for de-duplication.
    pub event_id: Uuid,

    /// When the message was queued.
    pub timestamp: DateTime<Utc>,

    /// Human-readable message.
    pub message: String,

    /// Structured details, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub more_data: Option<serde_json::Value>,
}

/// One outbound record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Retrospective start of an encounter that ended while transient.
    StartTransientEncounter(EncounterReport),
    /// End of an encounter that never became actual.
    EndTransientEncounter(EncounterReport),
    /// An encounter became actual.
    StartActualEncounter(EncounterReport),
    /// An actual encounter ended.
    EndActualEncounter(EncounterReport),
    /// Operational message.
    Message(MessageRecord),
}

impl OutboundEvent {
    /// The two records describing an encounter that ended while transient.
    #[must_use]
    pub fn transient_ended(
        encounter: &Encounter,
        thresholds: &Thresholds,
        reason: EndReason,
        ended_at: DateTime<Utc>,
    ) -> [Self; 2] {
        [
            Self::StartTransientEncounter(EncounterReport::new(
                encounter,
                thresholds,
                encounter.initial_enter(),
            )),
            Self::EndTransientEncounter(
                EncounterReport::new(encounter, thresholds, ended_at).with_end_reason(reason),
            ),
        ]
    }

    /// The record for an encounter that just became actual.
    #[must_use]
    pub fn actual_started(
        encounter: &Encounter,
        thresholds: &Thresholds,
        notified_at: DateTime<Utc>,
    ) -> Self {
        Self::StartActualEncounter(
            EncounterReport::new(encounter, thresholds, encounter.initial_enter())
                .with_notif_at(notified_at),
        )
    }

    /// The record for an actual encounter that ended.
    #[must_use]
    pub fn actual_ended(
        encounter: &Encounter,
        thresholds: &Thresholds,
        reason: EndReason,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self::EndActualEncounter(
            EncounterReport::new(encounter, thresholds, ended_at).with_end_reason(reason),
        )
    }

    /// An operational message stamped `now`.
    #[must_use]
    pub fn message(
        now: DateTime<Utc>,
        message: impl Into<String>,
        more_data: Option<serde_json::Value>,
    ) -> Self {
        Self::Message(MessageRecord {
            event_id: Uuid::now_v7(),
            timestamp: now,
            message: message.into(),
            more_data,
        })
    }

    /// Wire name of the record type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StartTransientEncounter(_) => "start_transient_encounter",
            Self::EndTransientEncounter(_) => "end_transient_encounter",
            Self::StartActualEncounter(_) => "start_actual_encounter",
            Self::EndActualEncounter(_) => "end_actual_encounter",
            Self::Message(_) => "message",
        }
    }

    /// The record's timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StartTransientEncounter(report)
            | Self::EndTransientEncounter(report)
            | Self::StartActualEncounter(report)
            | Self::EndActualEncounter(report) => report.timestamp,
            Self::Message(record) => record.timestamp,
        }
    }

    /// Encounter details, unless this is a message.
    #[must_use]
    pub const fn report(&self) -> Option<&EncounterReport> {
        match self {
            Self::StartTransientEncounter(report)
            | Self::EndTransientEncounter(report)
            | Self::StartActualEncounter(report)
            | Self::EndActualEncounter(report) => Some(report),
            Self::Message(_) => None,
        }
    }
}

/// Ordered, persisted outbound queue.
pub struct EventSink {
    backlog: Mutex<Vec<OutboundEvent>>,
    store: Arc<dyn KeyValueStore>,
}

impl EventSink {
    /// Reload the backlog persisted in `store`.
    ///
    /// An unreadable backlog is logged and replaced by an empty one.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let backlog = match store.get(EVENT_QUEUE_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|err| {
                error!(error = %err, "discarding unreadable event backlog");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                error!(error = %err, "failed to read event backlog");
                Vec::new()
            }
        };
        debug!(queued = backlog.len(), "event sink loaded");
        Self {
            backlog: Mutex::new(backlog),
            store,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OutboundEvent>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, backlog: &[OutboundEvent]) -> Result<()> {
        let json = serde_json::to_string(backlog)?;
        self.store.put(EVENT_QUEUE_KEY, &json)
    }

    /// Append records in order and persist the backlog.
    ///
    /// The records stay queued in memory even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be persisted.
    pub fn append(&self, events: impl IntoIterator<Item = OutboundEvent>) -> Result<()> {
        let mut backlog = self.lock();
        let before = backlog.len();
        backlog.extend(events);
        if backlog.len() == before {
            return Ok(());
        }
        for event in &backlog[before..] {
            debug!(event_type = event.event_type(), timestamp = %event.timestamp(), "event queued");
        }
        self.persist(&backlog)
    }

    /// Queue an operational message, logging rather than failing on persistence errors.
    pub fn log_message(
        &self,
        now: DateTime<Utc>,
        message: impl Into<String>,
        more_data: Option<serde_json::Value>,
    ) {
        if let Err(err) = self.append([OutboundEvent::message(now, message, more_data)]) {
            warn!(error = %err, "failed to persist queued message");
        }
    }

    /// Take every queued record, leaving the queue empty.
    ///
    /// If the emptied backlog cannot be persisted the records are still
    /// returned; they may then be delivered again after a restart.
    pub fn drain(&self) -> Vec<OutboundEvent> {
        let mut backlog = self.lock();
        let drained = std::mem::take(&mut *backlog);
        if !drained.is_empty() {
            if let Err(err) = self.persist(&backlog) {
                warn!(error = %err, "failed to persist drained event backlog");
            }
        }
        drained
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}
