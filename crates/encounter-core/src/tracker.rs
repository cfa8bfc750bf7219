//! The tracker facade.
//!
//! [`EncounterTracker`] owns the friend directory, thresholds, encounter table
//! and wake scheduler behind one lock, and wires them to the host
//! collaborators: durable storage, the one-shot alarm and the notifier.
//!
//! Every top-level update (batch delivery, alarm fire, fetch, setter) runs to
//! completion under the lock, persists the encounter snapshot before
//! releasing it, and re-arms the alarm for the nearest deadline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, Direction, TriggerBatch};
use crate::encounter::{EncounterRecord, Phase};
use crate::engine::{EncounterEngine, Lifecycle};
use crate::error::Result;
use crate::friends::{Friend, FriendDirectory};
use crate::scheduler::{AlarmClock, WakeDecision, WakeScheduler};
use crate::sink::{EventSink, OutboundEvent};
use crate::storage::{KeyValueStore, FRIEND_LIST_KEY, SNAPSHOT_KEY};
use crate::thresholds::{Threshold, ThresholdStore, Thresholds};
use crate::types::{BatchSummary, TrackerStatus};

/// Host primitive: show the participant a local notification.
pub trait Notifier: Send + Sync {
    /// Fire a notification for `direction` concerning `friend`.
    fn notify(&self, direction: Direction, friend: &Friend);
}

struct TrackerState {
    directory: FriendDirectory,
    thresholds: ThresholdStore,
    /// `None` until first access; restored lazily from the snapshot.
    engine: Option<EncounterEngine>,
    scheduler: WakeScheduler,
}

/// Encounter tracking with persistence and scheduling.
pub struct EncounterTracker {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    sink: EventSink,
    state: Mutex<TrackerState>,
}

impl EncounterTracker {
    /// Build a tracker over `store`, loading the friend list, thresholds and
    /// queued events. Open encounters are restored on first use.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        alarm: Arc<dyn AlarmClock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let directory = match store.get(FRIEND_LIST_KEY) {
            Ok(Some(csv)) => FriendDirectory::parse_lenient(&csv),
            Ok(None) => FriendDirectory::default(),
            Err(err) => {
                error!(error = %err, "failed to read friend list");
                FriendDirectory::default()
            }
        };
        info!(friends = directory.len(), "friend directory loaded");

        let thresholds = ThresholdStore::load(store.as_ref());
        let sink = EventSink::load(Arc::clone(&store));

        Self {
            store,
            notifier,
            sink,
            state: Mutex::new(TrackerState {
                directory,
                thresholds,
                engine: None,
                scheduler: WakeScheduler::new(alarm),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore state and re-arm the alarm for the nearest pending deadline.
    ///
    /// Called once when the host process starts.
    pub fn start(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        let engine = self.engine(&mut state, now);
        info!(open = engine.len(), "tracker started");
        self.reschedule(&mut state);
    }

    /// Process a delivered trigger batch.
    ///
    /// `now` is the delivery instant, used for triggers without their own
    /// timestamp. The batch is acknowledged exactly once, after the snapshot
    /// is persisted.
    pub fn handle_batch(&self, batch: TriggerBatch, now: DateTime<Utc>) -> BatchSummary {
        let mut summary = BatchSummary {
            received: batch.triggers().len(),
            ..BatchSummary::default()
        };

        {
            let mut state = self.lock();
            let mut events = Vec::with_capacity(summary.received);
            for raw in batch.triggers() {
                match classify(raw, &state.directory, now) {
                    Ok(event) => events.push(event),
                    Err(reason) => {
                        debug!(campaign = %raw.campaign_name, %reason, "trigger skipped");
                        summary.skipped += 1;
                    }
                }
            }
            events.sort_by_key(|event| event.observed_at);

            let thresholds = state.thresholds.current();
            self.engine(&mut state, now);
            for event in &events {
                debug!(
                    friend = %event.friend.name,
                    direction = %event.direction,
                    at = %event.observed_at,
                    "applying beacon event"
                );
                let changes = match state.engine.as_mut() {
                    Some(engine) => engine.apply(event, &thresholds),
                    None => Vec::new(),
                };
                match self.publish(changes, &thresholds, now) {
                    Ok(()) => summary.applied += 1,
                    Err(err) => {
                        summary.failed += 1;
                        error!(friend = %event.friend.name, error = %err, "encounter update failed");
                        self.sink.log_message(
                            now,
                            "encounter update failed",
                            Some(json!({
                                "friend_name": event.friend.name,
                                "error": err.to_string(),
                            })),
                        );
                    }
                }
            }

            self.persist(&state, now);
            self.reschedule(&mut state);
        }

        info!(
            received = summary.received,
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed,
            "trigger batch processed"
        );
        batch.acknowledge();
        summary
    }

    /// Handle an alarm fire at `now`.
    pub fn on_wake(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        match state.scheduler.fire(now) {
            WakeDecision::Unexpected => {
                self.sink.log_message(now, "unexpected wake-up with no pending deadline", None);
            }
            WakeDecision::Early(deadline) => {
                debug!(%now, %deadline, "wake-up ahead of deadline");
            }
            WakeDecision::Due(deadline) => {
                debug!(%now, %deadline, "wake-up due");
                self.advance(&mut state, now);
            }
        }
    }

    /// Advance time to `now`, then take every queued outbound record.
    pub fn fetch_events(&self, now: DateTime<Utc>) -> Vec<OutboundEvent> {
        {
            let mut state = self.lock();
            self.advance(&mut state, now);
        }
        let events = self.sink.drain();
        debug!(count = events.len(), "events fetched");
        events
    }

    /// Replace the friend directory and persist the list.
    ///
    /// Open encounters are kept even if their friend disappears from the list;
    /// they run to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if a record is malformed (nothing changes) or the list
    /// cannot be persisted.
    pub fn set_friend_list(&self, csv: &str, now: DateTime<Utc>) -> Result<Vec<Friend>> {
        let directory = FriendDirectory::parse(csv)?;
        let mut state = self.lock();
        self.engine(&mut state, now);
        self.store.put(FRIEND_LIST_KEY, csv)?;
        info!(friends = directory.len(), "friend list replaced");
        state.directory = directory;
        Ok(state.directory.friends().to_vec())
    }

    /// Set one threshold and re-arm for the resulting nearest deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    pub fn set_threshold(&self, threshold: Threshold, secs: u64) -> Result<Thresholds> {
        let mut state = self.lock();
        state.thresholds.set(self.store.as_ref(), threshold, secs)?;
        self.reschedule(&mut state);
        Ok(state.thresholds.current())
    }

    /// Set the maximum encounter age in fractional hours.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    pub fn set_max_encounter_age_hours(&self, hours: f64) -> Result<Thresholds> {
        let mut state = self.lock();
        state
            .thresholds
            .set_max_encounter_age_hours(self.store.as_ref(), hours)?;
        self.reschedule(&mut state);
        Ok(state.thresholds.current())
    }

    /// Thresholds in force.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.lock().thresholds.current()
    }

    /// Friends in list order.
    #[must_use]
    pub fn friends(&self) -> Vec<Friend> {
        self.lock().directory.friends().to_vec()
    }

    /// Number of records waiting to be fetched.
    #[must_use]
    pub fn queued_events(&self) -> usize {
        self.sink.len()
    }

    /// Debug view of everything the tracker holds.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> TrackerStatus {
        let mut state = self.lock();
        let encounters = self.engine(&mut state, now).snapshot();
        TrackerStatus {
            friends: state.directory.friends().to_vec(),
            thresholds: state.thresholds.current(),
            encounters,
            pending_wake: state.scheduler.pending(),
            queued_events: self.sink.len(),
        }
    }

    /// The engine, restoring it from the snapshot on first access.
    fn engine<'a>(&self, state: &'a mut TrackerState, now: DateTime<Utc>) -> &'a mut EncounterEngine {
        if state.engine.is_none() {
            let restored = self.restore(&state.directory, now);
            state.engine = Some(restored);
        }
        state.engine.get_or_insert_with(EncounterEngine::new)
    }

    fn restore(&self, directory: &FriendDirectory, now: DateTime<Utc>) -> EncounterEngine {
        let records: Vec<EncounterRecord> = match self.store.get(SNAPSHOT_KEY) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(records) => records,
                Err(err) => {
                    error!(error = %err, "discarding unreadable encounter snapshot");
                    self.sink.log_message(
                        now,
                        "discarding unreadable encounter snapshot",
                        Some(json!({ "error": err.to_string() })),
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                error!(error = %err, "failed to read encounter snapshot");
                Vec::new()
            }
        };

        let (engine, dropped) = EncounterEngine::restore(records, directory);
        for entry in &dropped {
            error!(friend = %entry.record.friend_name, "dropping encounter for unknown friend");
            self.sink.log_message(
                now,
                "dropping encounter for unknown friend",
                Some(json!({ "friend_name": entry.record.friend_name })),
            );
        }
        info!(restored = engine.len(), dropped = dropped.len(), "encounters restored");
        engine
    }

    /// Advance every encounter to `now`, publish, persist and re-arm.
    fn advance(&self, state: &mut TrackerState, now: DateTime<Utc>) {
        let thresholds = state.thresholds.current();
        let changes = self.engine(state, now).advance(now, &thresholds);
        if let Err(err) = self.publish(changes, &thresholds, now) {
            error!(error = %err, "time advance failed");
            self.sink.log_message(
                now,
                "time advance failed",
                Some(json!({ "error": err.to_string() })),
            );
        }
        self.persist(state, now);
        self.reschedule(state);
    }

    /// Fire side effects and queue outbound records for lifecycle changes.
    fn publish(&self, changes: Vec<Lifecycle>, thresholds: &Thresholds, now: DateTime<Utc>) -> Result<()> {
        let mut events = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                Lifecycle::StartedActual(encounter) => {
                    self.notifier.notify(Direction::Enter, encounter.friend());
                    events.push(OutboundEvent::actual_started(&encounter, thresholds, now));
                }
                Lifecycle::Ended {
                    encounter,
                    reason,
                    ended_at,
                } => match encounter.phase() {
                    Phase::Transient => events.extend(OutboundEvent::transient_ended(
                        &encounter, thresholds, reason, ended_at,
                    )),
                    Phase::Actual => events.push(OutboundEvent::actual_ended(
                        &encounter, thresholds, reason, ended_at,
                    )),
                },
            }
        }
        self.sink.append(events)
    }

    fn persist(&self, state: &TrackerState, now: DateTime<Utc>) {
        let Some(engine) = state.engine.as_ref() else {
            return;
        };
        let result = serde_json::to_string(&engine.snapshot())
            .map_err(Into::into)
            .and_then(|json| self.store.put(SNAPSHOT_KEY, &json));
        if let Err(err) = result {
            error!(error = %err, "failed to persist encounter snapshot");
            self.sink.log_message(
                now,
                "failed to persist encounter snapshot",
                Some(json!({ "error": err.to_string() })),
            );
        }
    }

    fn reschedule(&self, state: &mut TrackerState) {
        let thresholds = state.thresholds.current();
        let next = state
            .engine
            .as_ref()
            .and_then(|engine| engine.next_deadline(&thresholds));
        match next {
            Some(deadline) => {
                if state.scheduler.schedule_before(deadline) {
                    debug!(%deadline, "next wake-up armed");
                }
            }
            None => {
                if state.scheduler.pending().is_none() {
                    debug!("no open encounters, nothing to schedule");
                } else {
                    warn!(pending = ?state.scheduler.pending(), "stale wake-up left armed");
                }
            }
        }
    }
}

impl std::fmt::Debug for EncounterTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterTracker")
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RawTrigger;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Alarm(Mutex<Vec<DateTime<Utc>>>);

    impl AlarmClock for Alarm {
        fn arm(&self, at: DateTime<Utc>) {
            self.0.lock().unwrap().push(at);
        }
    }

    #[derive(Default)]
    struct Notifications(Mutex<Vec<(Direction, String)>>);

    impl Notifier for Notifications {
        fn notify(&self, direction: Direction, friend: &Friend) {
            self.0.lock().unwrap().push((direction, friend.name.clone()));
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn trigger(kind: &str, minor: &str, secs: i64) -> RawTrigger {
        RawTrigger {
            campaign_name: "beacons".into(),
            trigger_kind: Some(kind.into()),
            match_payload: [
                ("majorId", "100".to_string()),
                ("minorId", minor.to_string()),
                ("triggerTimeInMilli", (secs * 1000).to_string()),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        alarm: Arc<Alarm>,
        notifications: Arc<Notifications>,
        tracker: EncounterTracker,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alarm = Arc::new(Alarm::default());
        let notifications = Arc::new(Notifications::default());
        let tracker = EncounterTracker::new(store.clone(), alarm.clone(), notifications.clone());
        tracker.set_friend_list("Sam-100-200,Lee-100-300", at(0)).unwrap();
        Fixture {
            store,
            alarm,
            notifications,
            tracker,
        }
    }

    #[test]
    fn test_batch_is_sorted_and_summarized() {
        let f = fixture();
        let batch = TriggerBatch::new(vec![
            trigger("exit", "200", 50),
            trigger("enter", "200", 0),
            trigger("enter", "999", 10),
            trigger("dwell", "300", 10),
        ]);
        let summary = f.tracker.handle_batch(batch, at(60));

        assert_eq!(summary.received, 4);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.skipped, 2);
        let status = f.tracker.status(at(60));
        assert_eq!(status.encounters.len(), 1);
        assert_eq!(status.encounters[0].recent_exit, Some(at(50)));
        assert_eq!(status.pending_wake, Some(at(170)));
    }

    #[test]
    fn test_batch_acknowledged_once() {
        let f = fixture();
        let acks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acks);
        let batch = TriggerBatch::new(vec![trigger("enter", "200", 0)]).on_acknowledge(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        f.tracker.handle_batch(batch, at(0));
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_written_after_batch() {
        let f = fixture();
        f.tracker
            .handle_batch(TriggerBatch::new(vec![trigger("enter", "300", 5)]), at(5));
        let json = f.store.get(SNAPSHOT_KEY).unwrap().unwrap();
        let records: Vec<EncounterRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].friend_name, "Lee");
    }

    #[test]
    fn test_wake_promotes_and_notifies() {
        let f = fixture();
        f.tracker
            .handle_batch(TriggerBatch::new(vec![trigger("enter", "200", 0)]), at(0));
        assert_eq!(f.alarm.0.lock().unwrap().last(), Some(&at(300)));

        f.tracker.on_wake(at(300));
        assert_eq!(
            *f.notifications.0.lock().unwrap(),
            vec![(Direction::Enter, "Sam".to_string())]
        );
        let events = f.tracker.fetch_events(at(300));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "start_actual_encounter");
        assert_eq!(events[0].timestamp(), at(0));
        assert_eq!(events[0].report().unwrap().notif_at, Some(at(300)));
    }

    #[test]
    fn test_early_wake_does_not_advance() {
        let f = fixture();
        f.tracker
            .handle_batch(TriggerBatch::new(vec![trigger("enter", "200", 0)]), at(0));
        f.tracker.on_wake(at(200));

        let status = f.tracker.status(at(200));
        assert_eq!(status.encounters[0].phase, Phase::Transient);
        assert_eq!(status.pending_wake, Some(at(300)));
        assert!(f.notifications.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_wake_queues_message() {
        let f = fixture();
        f.tracker.on_wake(at(10));
        let events = f.tracker.fetch_events(at(10));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "message");
    }

    #[test]
    fn test_fetch_advances_time_first() {
        let f = fixture();
        f.tracker.handle_batch(
            TriggerBatch::new(vec![trigger("enter", "200", 0), trigger("exit", "200", 30)]),
            at(30),
        );
        let events = f.tracker.fetch_events(at(150));
        let types: Vec<_> = events.iter().map(OutboundEvent::event_type).collect();
        assert_eq!(types, vec!["start_transient_encounter", "end_transient_encounter"]);
        assert!(f.tracker.fetch_events(at(150)).is_empty());
    }

    #[test]
    fn test_malformed_friend_list_rejected() {
        let f = fixture();
        assert!(f.tracker.set_friend_list("Sam-100", at(0)).is_err());
        assert_eq!(f.tracker.friends().len(), 2);
        assert_eq!(
            f.store.get(FRIEND_LIST_KEY).unwrap().as_deref(),
            Some("Sam-100-200,Lee-100-300")
        );
    }

    #[test]
    fn test_shorter_threshold_rearms_sooner() {
        let f = fixture();
        f.tracker
            .handle_batch(TriggerBatch::new(vec![trigger("enter", "200", 0)]), at(0));
        let thresholds = f.tracker.set_threshold(Threshold::MinDuration, 60).unwrap();
        assert_eq!(thresholds.min_duration_secs, 60);
        assert_eq!(f.tracker.status(at(0)).pending_wake, Some(at(60)));
    }

    #[test]
    fn test_restart_restores_and_rearms() {
        let f = fixture();
        f.tracker
            .handle_batch(TriggerBatch::new(vec![trigger("enter", "200", 0)]), at(0));

        let alarm = Arc::new(Alarm::default());
        let restarted = EncounterTracker::new(f.store.clone(), alarm.clone(), f.notifications.clone());
        restarted.start(at(100));

        assert_eq!(restarted.friends().len(), 2);
        assert_eq!(*alarm.0.lock().unwrap(), vec![at(300)]);
        assert_eq!(restarted.status(at(100)).encounters, f.tracker.status(at(100)).encounters);
    }
}
