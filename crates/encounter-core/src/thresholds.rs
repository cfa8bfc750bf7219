//! Encounter duration thresholds.
//!
//! Four independently settable durations, each persisted under its own key and
//! read back with a typed default when absent or unparseable.
//!
//! No cross-field validation is performed: nothing stops `transient_timeout`
//! from exceeding `actual_timeout`, or `max_encounter_age` from being shorter
//! than `min_duration`. Callers own that contract.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::Result;
use crate::storage::KeyValueStore;

/// Default time before a transient encounter becomes actual: 5 minutes.
pub const DEFAULT_MIN_DURATION_SECS: u64 = 5 * 60;

/// Default exit timeout for transient encounters: 2 minutes.
pub const DEFAULT_TRANSIENT_TIMEOUT_SECS: u64 = 2 * 60;

/// Default exit timeout for actual encounters: 10 minutes.
pub const DEFAULT_ACTUAL_TIMEOUT_SECS: u64 = 10 * 60;

/// Default maximum encounter age: 8 hours.
pub const DEFAULT_MAX_ENCOUNTER_AGE_SECS: u64 = 8 * 60 * 60;

/// One of the four thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Threshold {
    /// Elapsed time after the first enter at which a transient encounter becomes actual.
    MinDuration,
    /// How long an unresolved exit may last before a transient encounter ends.
    TransientTimeout,
    /// How long an unresolved exit may last before an actual encounter ends.
    ActualTimeout,
    /// Elapsed time after the first enter at which an actual encounter ends regardless.
    MaxEncounterAge,
}

impl Threshold {
    /// Every threshold, in storage order.
    pub const ALL: [Self; 4] = [
        Self::MinDuration,
        Self::TransientTimeout,
        Self::ActualTimeout,
        Self::MaxEncounterAge,
    ];

    /// Storage key for this threshold.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::MinDuration => "encounter.thresholds.min_duration_secs",
            Self::TransientTimeout => "encounter.thresholds.transient_timeout_secs",
            Self::ActualTimeout => "encounter.thresholds.actual_timeout_secs",
            Self::MaxEncounterAge => "encounter.thresholds.max_encounter_age_secs",
        }
    }

    /// Value used when nothing is stored.
    #[must_use]
    pub const fn default_secs(self) -> u64 {
        match self {
            Self::MinDuration => DEFAULT_MIN_DURATION_SECS,
            Self::TransientTimeout => DEFAULT_TRANSIENT_TIMEOUT_SECS,
            Self::ActualTimeout => DEFAULT_ACTUAL_TIMEOUT_SECS,
            Self::MaxEncounterAge => DEFAULT_MAX_ENCOUNTER_AGE_SECS,
        }
    }
}

/// A consistent reading of all four thresholds, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "min_duration_secs": 300,
    "transient_timeout_secs": 120,
    "actual_timeout_secs": 600,
    "max_encounter_age_secs": 28800
}))]
pub struct Thresholds {
    /// Time after the first enter at which a transient encounter becomes actual.
    pub min_duration_secs: u64,

    /// Exit timeout for transient encounters.
    pub transient_timeout_secs: u64,

    /// Exit timeout for actual encounters.
    pub actual_timeout_secs: u64,

    /// Age at which an actual encounter ends even with ongoing detections.
    pub max_encounter_age_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            transient_timeout_secs: DEFAULT_TRANSIENT_TIMEOUT_SECS,
            actual_timeout_secs: DEFAULT_ACTUAL_TIMEOUT_SECS,
            max_encounter_age_secs: DEFAULT_MAX_ENCOUNTER_AGE_SECS,
        }
    }
}

/// Seconds as a [`TimeDelta`], saturating at [`TimeDelta::MAX`].
///
/// Saturated values never elapse: adding them to any instant overflows,
/// which deadline arithmetic treats as "never".
#[must_use]
pub fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl Thresholds {
    /// Read one threshold.
    #[must_use]
    pub const fn secs(&self, threshold: Threshold) -> u64 {
        match threshold {
            Threshold::MinDuration => self.min_duration_secs,
            Threshold::TransientTimeout => self.transient_timeout_secs,
            Threshold::ActualTimeout => self.actual_timeout_secs,
            Threshold::MaxEncounterAge => self.max_encounter_age_secs,
        }
    }

    fn set_secs(&mut self, threshold: Threshold, secs: u64) {
        match threshold {
            Threshold::MinDuration => self.min_duration_secs = secs,
            Threshold::TransientTimeout => self.transient_timeout_secs = secs,
            Threshold::ActualTimeout => self.actual_timeout_secs = secs,
            Threshold::MaxEncounterAge => self.max_encounter_age_secs = secs,
        }
    }

    /// Minimum duration as a time delta.
    #[must_use]
    pub fn min_duration(&self) -> TimeDelta {
        secs_to_delta(self.min_duration_secs)
    }

    /// Transient exit timeout as a time delta.
    #[must_use]
    pub fn transient_timeout(&self) -> TimeDelta {
        secs_to_delta(self.transient_timeout_secs)
    }

    /// Actual exit timeout as a time delta.
    #[must_use]
    pub fn actual_timeout(&self) -> TimeDelta {
        secs_to_delta(self.actual_timeout_secs)
    }

    /// Maximum encounter age as a time delta.
    #[must_use]
    pub fn max_encounter_age(&self) -> TimeDelta {
        secs_to_delta(self.max_encounter_age_secs)
    }
}

/// Persisted, runtime-mutable thresholds.
///
/// Values are cached in memory and written through on every change.
pub struct ThresholdStore {
    current: Thresholds,
}

impl ThresholdStore {
    /// Load every threshold from `store`, defaulting what is absent or unreadable.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let mut current = Thresholds::default();
        for threshold in Threshold::ALL {
            match store.get(threshold.key()) {
                Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                    Ok(secs) => current.set_secs(threshold, secs),
                    Err(_) => warn!(
                        key = threshold.key(),
                        value = %raw,
                        "ignoring unparseable threshold"
                    ),
                },
                Ok(None) => {}
                Err(err) => warn!(key = threshold.key(), error = %err, "failed to read threshold"),
            }
        }
        info!(?current, "thresholds loaded");
        Self { current }
    }

    /// Current values.
    #[must_use]
    pub const fn current(&self) -> Thresholds {
        self.current
    }

    /// Set one threshold and persist it.
    ///
    /// The in-memory value changes only if the write succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    pub fn set(&mut self, store: &dyn KeyValueStore, threshold: Threshold, secs: u64) -> Result<()> {
        store.put(threshold.key(), &secs.to_string())?;
        self.current.set_secs(threshold, secs);
        info!(key = threshold.key(), secs, "threshold set");
        Ok(())
    }

    /// Set the maximum encounter age from fractional hours, rounded to whole seconds.
    ///
    /// Negative values and NaN clamp to zero. Values too large to represent,
    /// infinity included, saturate at `u64::MAX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    pub fn set_max_encounter_age_hours(
        &mut self,
        store: &dyn KeyValueStore,
        hours: f64,
    ) -> Result<()> {
        self.set(store, Threshold::MaxEncounterAge, hours_to_secs(hours))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn hours_to_secs(hours: f64) -> u64 {
    let secs = (hours * 3600.0).round();
    if secs.is_nan() || secs <= 0.0 {
        0
    } else if secs >= u64::MAX as f64 {
        u64::MAX
    } else {
        secs as u64
    }
}
