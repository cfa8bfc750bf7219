//! Application state shared across handlers.

use std::sync::Arc;

use encounter_core::EncounterTracker;

use crate::api::error::{ApiError, ApiResult};

/// Handle to the application state, cloned into every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    tracker: Arc<EncounterTracker>,
}

impl AppState {
    /// Wrap a tracker for the HTTP layer.
    #[must_use]
    pub fn new(tracker: Arc<EncounterTracker>) -> SharedState {
        Arc::new(Self { tracker })
    }

    /// The tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<EncounterTracker> {
        &self.tracker
    }

    /// Run a tracker operation on the blocking pool.
    ///
    /// Tracker operations take a lock and write to storage synchronously.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the operation panicked.
    pub async fn with_tracker<T, F>(&self, op: F) -> ApiResult<T>
    where
        F: FnOnce(&EncounterTracker) -> T + Send + 'static,
        T: Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        tokio::task::spawn_blocking(move || op(&tracker))
            .await
            .map_err(|e| ApiError::InternalError {
                error_code: "tracker_task_failed".to_string(),
                message: "Tracker operation did not complete".to_string(),
                details: Some(e.to_string()),
            })
    }
}
