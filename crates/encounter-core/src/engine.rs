//! Encounter engine: one state machine per friend.
//!
//! The engine is pure bookkeeping. It applies beacon events and time advances
//! to the friend → encounter table and reports lifecycle changes as
//! [`Lifecycle`] values; turning those into notifications, outbound records,
//! persistence and wake-ups is the tracker's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::classifier::{BeaconEvent, Direction};
use crate::encounter::{EndReason, Encounter, EncounterRecord, Evaluation, Phase};
use crate::friends::FriendDirectory;
use crate::thresholds::Thresholds;

/// A lifecycle change produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// The encounter became ACTUAL. Carries the encounter right after promotion.
    StartedActual(Encounter),
    /// The encounter ended. Carries its final state, already removed from the table.
    Ended {
        /// Final state; its phase tells TRANSIENT and ACTUAL endings apart.
        encounter: Encounter,
        /// Why it ended.
        reason: EndReason,
        /// Reported end instant.
        ended_at: DateTime<Utc>,
    },
}

/// A snapshot record that could not be restored.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRecord {
    /// The record as persisted.
    pub record: EncounterRecord,
}

/// The friend → encounter table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterEngine {
    encounters: BTreeMap<String, Encounter>,
}

impl EncounterEngine {
    /// Create an engine with no open encounters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table from snapshot records.
    ///
    /// Records whose friend is no longer in `directory` are returned as dropped.
    /// A later record for the same friend replaces an earlier one.
    #[must_use]
    pub fn restore(
        records: Vec<EncounterRecord>,
        directory: &FriendDirectory,
    ) -> (Self, Vec<DroppedRecord>) {
        let mut engine = Self::new();
        let mut dropped = Vec::new();
        for record in records {
            match directory.by_name(&record.friend_name) {
                Some(friend) => {
                    let encounter = Encounter::from_record(friend.clone(), &record);
                    engine.encounters.insert(record.friend_name.clone(), encounter);
                }
                None => dropped.push(DroppedRecord { record }),
            }
        }
        (engine, dropped)
    }

    /// Flat records for every open encounter, ordered by friend name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EncounterRecord> {
        self.encounters.values().map(Encounter::to_record).collect()
    }

    /// The open encounter for `friend_name`, if any.
    #[must_use]
    pub fn get(&self, friend_name: &str) -> Option<&Encounter> {
        self.encounters.get(friend_name)
    }

    /// Open encounters, ordered by friend name.
    pub fn encounters(&self) -> impl Iterator<Item = &Encounter> {
        self.encounters.values()
    }

    /// Number of open encounters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.encounters.len()
    }

    /// Returns `true` if no encounter is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.encounters.is_empty()
    }

    /// Apply one beacon event.
    ///
    /// The friend's encounter is first advanced to the event time, so a
    /// deadline that passed before the event is honored; then the event is
    /// applied and the encounter advanced again at the same instant.
    pub fn apply(&mut self, event: &BeaconEvent, thresholds: &Thresholds) -> Vec<Lifecycle> {
        let name = event.friend.name.as_str();
        let at = event.observed_at;
        let mut changes = Vec::new();

        self.advance_one(name, at, thresholds, &mut changes);

        if let Some(encounter) = self.encounters.get_mut(name) {
            let resuming = encounter.recent_exit().is_some();
            let applied = match event.direction {
                Direction::Enter => encounter.record_enter(at),
                Direction::Exit => encounter.record_exit(at),
            };
            if !applied {
                debug!(
                    friend = %name,
                    direction = event.direction.as_str(),
                    at = %at,
                    "stale or repeated event ignored"
                );
                return changes;
            }
            if resuming && event.direction == Direction::Enter {
                debug!(friend = %name, at = %at, "spurious exit resumed");
            }
        } else if event.direction == Direction::Enter {
            info!(friend = %name, at = %at, "encounter started");
            self.encounters
                .insert(name.to_string(), Encounter::new(event.friend.clone(), at));
        } else {
            debug!(friend = %name, "no existing encounter, non-enter ignored");
            return changes;
        }

        self.advance_one(name, at, thresholds, &mut changes);
        changes
    }

    /// Advance every open encounter to `now`.
    pub fn advance(&mut self, now: DateTime<Utc>, thresholds: &Thresholds) -> Vec<Lifecycle> {
        let names: Vec<String> = self.encounters.keys().cloned().collect();
        let mut changes = Vec::new();
        for name in &names {
            self.advance_one(name, now, thresholds, &mut changes);
        }
        changes
    }

    /// Earliest deadline across all open encounters.
    #[must_use]
    pub fn next_deadline(&self, thresholds: &Thresholds) -> Option<DateTime<Utc>> {
        self.encounters
            .values()
            .filter_map(|encounter| encounter.next_deadline(thresholds))
            .min()
    }

    fn advance_one(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
        changes: &mut Vec<Lifecycle>,
    ) {
        // A promotion can make the age-out due in the same pass, so re-evaluate
        // until nothing changes. Each encounter promotes at most once.
        loop {
            let Some(encounter) = self.encounters.get_mut(name) else {
                return;
            };
            match encounter.evaluate(now, thresholds) {
                Evaluation::Keep => return,
                Evaluation::Promote => {
                    encounter.promote();
                    info!(friend = %name, now = %now, "encounter became actual");
                    changes.push(Lifecycle::StartedActual(encounter.clone()));
                }
                Evaluation::End { reason, ended_at } => {
                    if let Some(encounter) = self.encounters.remove(name) {
                        info!(
                            friend = %name,
                            phase = ?encounter.phase(),
                            ?reason,
                            ended_at = %ended_at,
                            "encounter ended"
                        );
                        changes.push(Lifecycle::Ended {
                            encounter,
                            reason,
                            ended_at,
                        });
                    }
                    return;
                }
            }
        }
    }
}

impl Lifecycle {
    /// Phase the encounter was in when this change was reported.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::StartedActual(encounter) | Self::Ended { encounter, .. } => encounter.phase(),
        }
    }
}
