//! Host alarm and notification hooks backed by tokio and tracing.
//!
//! [`TokioAlarm`] publishes the armed instant on a watch channel; [`run`]
//! sleeps until that instant and calls [`EncounterTracker::on_wake`]. A newer
//! arm replaces the one being waited on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use encounter_core::{AlarmClock, Direction, EncounterTracker, Friend, Notifier};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// One-shot alarm published over a watch channel.
#[derive(Debug)]
pub struct TokioAlarm {
    armed: watch::Sender<Option<DateTime<Utc>>>,
}

impl TokioAlarm {
    /// Create the alarm and the receiver [`run`] waits on.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<DateTime<Utc>>>) {
        let (armed, rx) = watch::channel(None);
        (Self { armed }, rx)
    }
}

impl AlarmClock for TokioAlarm {
    fn arm(&self, at: DateTime<Utc>) {
        // Marks the value changed even when the instant is the same, so an
        // early fire that re-arms still wakes the driver.
        self.armed.send_replace(Some(at));
    }
}

/// Drive `tracker.on_wake` from the alarm until the alarm is dropped.
pub async fn run(tracker: Arc<EncounterTracker>, mut armed: watch::Receiver<Option<DateTime<Utc>>>) {
    loop {
        let current = *armed.borrow_and_update();
        let Some(at) = current else {
            if armed.changed().await.is_err() {
                return;
            }
            continue;
        };

        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        debug!(%at, ?wait, "waiting for alarm");
        tokio::select! {
            changed = armed.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            () = tokio::time::sleep(wait) => {
                fire(&tracker).await;
                // Unless the wake-up re-armed, wait for the next arm.
                if !armed.has_changed().unwrap_or(false) && armed.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn fire(tracker: &Arc<EncounterTracker>) {
    let tracker = Arc::clone(tracker);
    if let Err(e) = tokio::task::spawn_blocking(move || tracker.on_wake(Utc::now())).await {
        error!(error = %e, "wake-up handler failed");
    }
}

/// Notifier that records local notifications in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, direction: Direction, friend: &Friend) {
        info!(%direction, friend = %friend.name, tag = %friend.tag, "local notification");
    }
}
