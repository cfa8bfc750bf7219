//! Debug status endpoint.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use encounter_core::TrackerStatus;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Get the tracker status.
///
/// Read-only: unlike the event fetch, this does not advance time.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Inspect tracker state",
    description = "Returns the friend directory, thresholds, every open encounter as \
        persisted, the armed wake-up and the number of queued events. Intended for \
        testing and debugging.",
    responses(
        (status = 200, description = "Tracker status", body = TrackerStatus)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<TrackerStatus>> {
    let status = state.with_tracker(|tracker| tracker.status(Utc::now())).await?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use encounter_core::Phase;
    use serde_json::json;

    #[tokio::test]
    async fn test_status_shows_open_encounter() {
        let (server, _dir) = test_server();
        server
            .put("/api/friends")
            .json(&json!({"friend_list": "Sam-100-200"}))
            .await
            .assert_status_ok();
        server
            .post("/api/triggers")
            .json(&json!({"triggers": [{
                "campaign_name": "beacon",
                "trigger_kind": "enter",
                "match_payload": {"majorId": "100", "minorId": "200"}
            }]}))
            .await
            .assert_status_ok();

        let status: TrackerStatus = server.get("/api/status").await.json();
        assert_eq!(status.friends.len(), 1);
        assert_eq!(status.encounters.len(), 1);
        assert_eq!(status.encounters[0].friend_name, "Sam");
        assert_eq!(status.encounters[0].phase, Phase::Transient);
        assert!(status.pending_wake.is_some());
        assert_eq!(status.queued_events, 0);
    }
}
