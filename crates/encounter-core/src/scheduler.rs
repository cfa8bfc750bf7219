//! Wake-up scheduling.
//!
//! Every open encounter has its own next deadline, but only one alarm is ever
//! outstanding: the scheduler keeps the soonest pending deadline and arms the
//! host's one-shot alarm for it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Host primitive: call back no later than the given instant.
///
/// Arming replaces any previously armed alarm. Implementations must not call
/// back into the tracker synchronously from `arm`.
pub trait AlarmClock: Send + Sync {
    /// Arm the one-shot alarm for `at`.
    fn arm(&self, at: DateTime<Utc>);
}

/// An alarm clock that never fires. Useful for embedding without a timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAlarm;

impl AlarmClock for NoAlarm {
    fn arm(&self, _at: DateTime<Utc>) {}
}

/// What an alarm fire should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeDecision {
    /// No deadline was pending. Nothing to do.
    Unexpected,
    /// Fired before the deadline; the alarm was re-armed for it.
    Early(DateTime<Utc>),
    /// The deadline has come. Advance state to now.
    Due(DateTime<Utc>),
}

/// Coalesces per-encounter deadlines into one armed alarm.
pub struct WakeScheduler {
    pending: Option<DateTime<Utc>>,
    alarm: Arc<dyn AlarmClock>,
}

impl WakeScheduler {
    /// Create a scheduler with nothing pending.
    pub fn new(alarm: Arc<dyn AlarmClock>) -> Self {
        Self {
            pending: None,
            alarm,
        }
    }

    /// The deadline the alarm is armed for, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<DateTime<Utc>> {
        self.pending
    }

    /// Arm for `deadline` unless an earlier or equal one is already pending.
    ///
    /// Returns `true` if the alarm was (re)armed.
    pub fn schedule_before(&mut self, deadline: DateTime<Utc>) -> bool {
        if self.pending.is_some_and(|pending| pending <= deadline) {
            return false;
        }
        debug!(%deadline, "arming wake-up");
        self.pending = Some(deadline);
        self.alarm.arm(deadline);
        true
    }

    /// Handle an alarm fire at `now`.
    ///
    /// Clears the pending deadline. An early fire re-arms for the same deadline.
    pub fn fire(&mut self, now: DateTime<Utc>) -> WakeDecision {
        let Some(deadline) = self.pending.take() else {
            warn!(%now, "unexpected wake-up with no pending deadline");
            return WakeDecision::Unexpected;
        };
        if now < deadline {
            debug!(%now, %deadline, "early wake-up, re-arming");
            self.schedule_before(deadline);
            return WakeDecision::Early(deadline);
        }
        WakeDecision::Due(deadline)
    }
}

impl std::fmt::Debug for WakeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeScheduler")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
