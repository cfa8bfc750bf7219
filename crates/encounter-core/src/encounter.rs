//! A single friend's open encounter and its transition rules.
//!
//! An encounter starts TRANSIENT on the first unmatched enter. It becomes
//! ACTUAL once `min_duration` has elapsed since that enter with no exit
//! outstanding, and ends when an exit stays unresolved for the phase's timeout,
//! or (ACTUAL only) when it reaches `max_encounter_age`. Ending always wins over
//! promotion when both are due.
//!
//! All deadline comparisons are inclusive: a deadline at `t` is reached at `t`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::friends::Friend;
use crate::thresholds::Thresholds;

/// Encounter phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Contact so far too short to count.
    Transient,
    /// Sustained contact; the participant has been notified.
    Actual,
}

/// Why an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// An exit went unanswered for the phase's timeout.
    ExitTimeout,
    /// The encounter reached the maximum age.
    MaxAge,
}

/// Running statistics over gaps between detection events, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GapStats {
    /// Number of samples.
    pub count: u32,
    /// Sum of samples.
    pub sum: f64,
    /// Sum of squared samples.
    pub sum_of_squares: f64,
    /// Largest sample, if any.
    pub max: Option<f64>,
}

impl GapStats {
    /// Fold one gap into the statistics. Negative gaps count as zero.
    pub fn record(&mut self, gap: TimeDelta) {
        #[allow(clippy::cast_precision_loss)]
        let secs = gap.num_milliseconds().max(0) as f64 / 1000.0;
        self.count = self.count.saturating_add(1);
        self.sum += secs;
        self.sum_of_squares += secs * secs;
        self.max = Some(self.max.map_or(secs, |max| max.max(secs)));
    }

    /// Mean gap, when there are samples.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }

    /// Population standard deviation, when there are samples.
    #[must_use]
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.sum_of_squares / f64::from(self.count) - mean * mean;
        Some(variance.max(0.0).sqrt())
    }
}

/// What a time-advance pass decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Nothing is due.
    Keep,
    /// Become ACTUAL.
    Promote,
    /// End the encounter; the end instant is what downstream sees.
    End {
        /// Why it ended.
        reason: EndReason,
        /// Reported end time: the unresolved exit if any, else the age-out deadline.
        ended_at: DateTime<Utc>,
    },
}

/// `base + delta`, or `None` if that overflows (the deadline never comes).
fn deadline(base: DateTime<Utc>, delta: TimeDelta) -> Option<DateTime<Utc>> {
    base.checked_add_signed(delta)
}

fn reached(base: DateTime<Utc>, delta: TimeDelta, now: DateTime<Utc>) -> bool {
    deadline(base, delta).is_some_and(|at| now >= at)
}

/// One friend's open encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct Encounter {
    friend: Friend,
    initial_enter: DateTime<Utc>,
    most_recent_enter: DateTime<Utc>,
    recent_exit: Option<DateTime<Utc>>,
    phase: Phase,
    stats: GapStats,
}

impl Encounter {
    /// Open a TRANSIENT encounter at the first enter.
    #[must_use]
    pub fn new(friend: Friend, entered_at: DateTime<Utc>) -> Self {
        Self {
            friend,
            initial_enter: entered_at,
            most_recent_enter: entered_at,
            recent_exit: None,
            phase: Phase::Transient,
            stats: GapStats::default(),
        }
    }

    /// Rebuild an encounter from its persisted record and resolved friend.
    #[must_use]
    pub fn from_record(friend: Friend, record: &EncounterRecord) -> Self {
        Self {
            friend,
            initial_enter: record.initial_enter,
            most_recent_enter: record.most_recent_enter.max(record.initial_enter),
            recent_exit: record.recent_exit,
            phase: record.phase,
            stats: record.stats,
        }
    }

    /// The owning friend.
    #[must_use]
    pub const fn friend(&self) -> &Friend {
        &self.friend
    }

    /// Instant of the enter that opened the encounter.
    #[must_use]
    pub const fn initial_enter(&self) -> DateTime<Utc> {
        self.initial_enter
    }

    /// Instant of the latest enter.
    #[must_use]
    pub const fn most_recent_enter(&self) -> DateTime<Utc> {
        self.most_recent_enter
    }

    /// Unresolved exit, if the encounter is potentially ending.
    #[must_use]
    pub const fn recent_exit(&self) -> Option<DateTime<Utc>> {
        self.recent_exit
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Gap statistics for the current phase.
    #[must_use]
    pub const fn stats(&self) -> &GapStats {
        &self.stats
    }

    /// Apply a subsequent enter. Returns `false` if the enter is stale and
    /// was ignored.
    ///
    /// An enter after an unresolved exit resumes the encounter and records the
    /// exit-to-enter gap. In ACTUAL, an enter with no exit in between records
    /// the gap since the previous enter. An enter observed before the latest
    /// known enter or exit changes nothing.
    pub fn record_enter(&mut self, at: DateTime<Utc>) -> bool {
        let latest = self
            .recent_exit
            .map_or(self.most_recent_enter, |exit| exit.max(self.most_recent_enter));
        if at < latest {
            return false;
        }

        if let Some(exit) = self.recent_exit.take() {
            self.stats.record(at - exit);
        } else if self.phase == Phase::Actual {
            self.stats.record(at - self.most_recent_enter);
        }
        self.most_recent_enter = at;
        true
    }

    /// Apply an exit. Returns `false` if the exit was ignored.
    ///
    /// Only the first of several unresolved exits counts, and an exit observed
    /// before the latest enter is stale.
    pub fn record_exit(&mut self, at: DateTime<Utc>) -> bool {
        if at < self.most_recent_enter || self.recent_exit.is_some() {
            return false;
        }
        self.recent_exit = Some(at);
        true
    }

    /// Decide what is due at `now`.
    #[must_use]
    pub fn evaluate(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> Evaluation {
        match self.phase {
            Phase::Transient => {
                if let Some(exit) = self.recent_exit {
                    if reached(exit, thresholds.transient_timeout(), now) {
                        return Evaluation::End {
                            reason: EndReason::ExitTimeout,
                            ended_at: exit,
                        };
                    }
                    Evaluation::Keep
                } else if reached(self.initial_enter, thresholds.min_duration(), now) {
                    Evaluation::Promote
                } else {
                    Evaluation::Keep
                }
            }
            Phase::Actual => {
                if let Some(exit) = self.recent_exit {
                    if reached(exit, thresholds.actual_timeout(), now) {
                        return Evaluation::End {
                            reason: EndReason::ExitTimeout,
                            ended_at: exit,
                        };
                    }
                }
                match deadline(self.initial_enter, thresholds.max_encounter_age()) {
                    Some(age_out) if now >= age_out => Evaluation::End {
                        reason: EndReason::MaxAge,
                        ended_at: self.recent_exit.unwrap_or(age_out),
                    },
                    _ => Evaluation::Keep,
                }
            }
        }
    }

    /// Switch to ACTUAL and start fresh statistics.
    pub fn promote(&mut self) {
        self.phase = Phase::Actual;
        self.stats = GapStats::default();
    }

    /// Next instant at which [`evaluate`](Self::evaluate) may change its answer.
    ///
    /// `None` means nothing will ever come due without a new event.
    #[must_use]
    pub fn next_deadline(&self, thresholds: &Thresholds) -> Option<DateTime<Utc>> {
        match self.phase {
            Phase::Transient => match self.recent_exit {
                Some(exit) => deadline(exit, thresholds.transient_timeout()),
                None => deadline(self.initial_enter, thresholds.min_duration()),
            },
            Phase::Actual => {
                let age_out = deadline(self.initial_enter, thresholds.max_encounter_age());
                let exit_timeout = self
                    .recent_exit
                    .and_then(|exit| deadline(exit, thresholds.actual_timeout()));
                match (age_out, exit_timeout) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
        }
    }

    /// Flat persisted form.
    #[must_use]
    pub fn to_record(&self) -> EncounterRecord {
        EncounterRecord {
            friend_name: self.friend.name.clone(),
            initial_enter: self.initial_enter,
            most_recent_enter: self.most_recent_enter,
            recent_exit: self.recent_exit,
            phase: self.phase,
            stats: self.stats,
        }
    }
}

/// Persisted form of an [`Encounter`], keyed by friend name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EncounterRecord {
    /// Name of the owning friend.
    pub friend_name: String,

    /// Instant of the opening enter.
    pub initial_enter: DateTime<Utc>,

    /// Instant of the latest enter.
    pub most_recent_enter: DateTime<Utc>,

    /// Unresolved exit, if any.
    #[serde(default)]
    pub recent_exit: Option<DateTime<Utc>>,

    /// Current phase.
    pub phase: Phase,

    /// Gap statistics.
    #[serde(default)]
    pub stats: GapStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sam() -> Friend {
        "Sam-100-200".parse().unwrap()
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            min_duration_secs: 300,
            transient_timeout_secs: 120,
            actual_timeout_secs: 600,
            max_encounter_age_secs: 3600,
        }
    }

    #[test]
    fn test_new_encounter_is_transient() {
        let encounter = Encounter::new(sam(), at(10));
        assert_eq!(encounter.phase(), Phase::Transient);
        assert_eq!(encounter.initial_enter(), at(10));
        assert_eq!(encounter.most_recent_enter(), at(10));
        assert_eq!(encounter.recent_exit(), None);
        assert_eq!(encounter.stats().count, 0);
    }

    #[test]
    fn test_promotion_boundary_is_inclusive() {
        let encounter = Encounter::new(sam(), at(0));
        assert_eq!(encounter.evaluate(at(299), &thresholds()), Evaluation::Keep);
        assert_eq!(encounter.evaluate(at(300), &thresholds()), Evaluation::Promote);
    }

    #[test]
    fn test_transient_with_exit_does_not_promote() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(250));
        assert_eq!(encounter.evaluate(at(300), &thresholds()), Evaluation::Keep);
        assert_eq!(
            encounter.evaluate(at(370), &thresholds()),
            Evaluation::End {
                reason: EndReason::ExitTimeout,
                ended_at: at(250)
            }
        );
    }

    #[test]
    fn test_resumed_exit_records_gap() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(50));
        encounter.record_enter(at(80));

        assert_eq!(encounter.recent_exit(), None);
        assert_eq!(encounter.most_recent_enter(), at(80));
        assert_eq!(encounter.stats().count, 1);
        assert_eq!(encounter.stats().max, Some(30.0));
    }

    #[test]
    fn test_repeated_exit_keeps_first() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(50));
        encounter.record_exit(at(90));
        assert_eq!(encounter.recent_exit(), Some(at(50)));
    }

    #[test]
    fn test_transient_enter_without_exit_records_nothing() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_enter(at(40));
        assert_eq!(encounter.stats().count, 0);
        assert_eq!(encounter.most_recent_enter(), at(40));
    }

    #[test]
    fn test_actual_enter_records_enter_to_enter_gap() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.promote();
        encounter.record_enter(at(20));
        encounter.record_enter(at(50));
        assert_eq!(encounter.stats().count, 2);
        assert_eq!(encounter.stats().sum, 50.0);
        assert_eq!(encounter.stats().max, Some(30.0));
    }

    #[test]
    fn test_late_enter_does_not_rewind() {
        let mut encounter = Encounter::new(sam(), at(100));
        assert!(!encounter.record_enter(at(60)));
        assert_eq!(encounter.most_recent_enter(), at(100));
    }

    #[test]
    fn test_enter_before_pending_exit_keeps_exit() {
        let mut encounter = Encounter::new(sam(), at(0));
        assert!(encounter.record_exit(at(100)));
        assert!(!encounter.record_enter(at(50)));

        assert_eq!(encounter.recent_exit(), Some(at(100)));
        assert_eq!(encounter.stats().count, 0);
        assert_eq!(
            encounter.evaluate(at(220), &thresholds()),
            Evaluation::End {
                reason: EndReason::ExitTimeout,
                ended_at: at(100),
            }
        );
    }

    #[test]
    fn test_exit_before_latest_enter_is_ignored() {
        let mut encounter = Encounter::new(sam(), at(1000));
        assert!(!encounter.record_exit(at(500)));
        assert_eq!(encounter.recent_exit(), None);
        assert_eq!(encounter.evaluate(at(1000), &thresholds()), Evaluation::Keep);

        encounter.record_exit(at(1010));
        encounter.record_enter(at(1040));
        assert!(!encounter.record_exit(at(1020)));
        assert_eq!(encounter.recent_exit(), None);
    }

    #[test]
    fn test_enter_at_exit_instant_resumes() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(30));
        assert!(encounter.record_enter(at(30)));
        assert_eq!(encounter.recent_exit(), None);
        assert_eq!(encounter.stats().max, Some(0.0));
    }

    #[test]
    fn test_promote_resets_stats() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(10));
        encounter.record_enter(at(20));
        encounter.promote();
        assert_eq!(encounter.phase(), Phase::Actual);
        assert_eq!(encounter.stats(), &GapStats::default());
    }

    #[test]
    fn test_actual_exit_timeout() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.promote();
        encounter.record_exit(at(700));
        assert_eq!(encounter.evaluate(at(1299), &thresholds()), Evaluation::Keep);
        assert_eq!(
            encounter.evaluate(at(1300), &thresholds()),
            Evaluation::End {
                reason: EndReason::ExitTimeout,
                ended_at: at(700)
            }
        );
    }

    #[test]
    fn test_actual_ages_out_at_deadline() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.promote();
        assert_eq!(encounter.evaluate(at(3599), &thresholds()), Evaluation::Keep);
        assert_eq!(
            encounter.evaluate(at(3600), &thresholds()),
            Evaluation::End {
                reason: EndReason::MaxAge,
                ended_at: at(3600)
            }
        );
    }

    #[test]
    fn test_age_out_reports_pending_exit() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.promote();
        encounter.record_exit(at(3500));
        assert_eq!(
            encounter.evaluate(at(3600), &thresholds()),
            Evaluation::End {
                reason: EndReason::MaxAge,
                ended_at: at(3500)
            }
        );
    }

    #[test]
    fn test_next_deadline_per_phase() {
        let mut encounter = Encounter::new(sam(), at(0));
        assert_eq!(encounter.next_deadline(&thresholds()), Some(at(300)));

        encounter.record_exit(at(100));
        assert_eq!(encounter.next_deadline(&thresholds()), Some(at(220)));

        encounter.record_enter(at(110));
        encounter.promote();
        assert_eq!(encounter.next_deadline(&thresholds()), Some(at(3600)));

        encounter.record_exit(at(2000));
        assert_eq!(encounter.next_deadline(&thresholds()), Some(at(2600)));

        encounter.record_enter(at(3300));
        encounter.record_exit(at(3400));
        assert_eq!(encounter.next_deadline(&thresholds()), Some(at(3600)));
    }

    #[test]
    fn test_unbounded_age_never_ends() {
        let unbounded = Thresholds {
            max_encounter_age_secs: u64::MAX,
            ..thresholds()
        };
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.promote();
        assert_eq!(encounter.next_deadline(&unbounded), None);
        assert_eq!(encounter.evaluate(at(i64::from(u32::MAX)), &unbounded), Evaluation::Keep);
    }

    #[test]
    fn test_stats_mean_and_std_dev() {
        let mut stats = GapStats::default();
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.std_dev(), None);

        for secs in [2, 4, 4, 4, 5, 5, 7, 9] {
            stats.record(TimeDelta::seconds(secs));
        }
        assert_eq!(stats.mean(), Some(5.0));
        assert!((stats.std_dev().unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(stats.max, Some(9.0));
    }

    #[test]
    fn test_negative_gap_counts_as_zero() {
        let mut stats = GapStats::default();
        stats.record(TimeDelta::seconds(-5));
        assert_eq!(stats.max, Some(0.0));
        assert_eq!(stats.std_dev(), Some(0.0));
    }

    #[test]
    fn test_record_roundtrip() {
        let mut encounter = Encounter::new(sam(), at(0));
        encounter.record_exit(at(10));
        encounter.record_enter(at(25));
        encounter.record_exit(at(40));

        let record = encounter.to_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"phase\":\"TRANSIENT\""));
        let decoded: EncounterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(Encounter::from_record(sam(), &decoded), encounter);
    }
}
