//! Outbound event drain.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use encounter_core::OutboundEvent;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Drained outbound records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FetchEventsResponse {
    /// Records in emission order.
    pub events: Vec<OutboundEvent>,
}

/// Fetch and clear queued events.
#[utoipa::path(
    post,
    path = "/api/events/fetch",
    tag = "events",
    operation_id = "fetchEvents",
    summary = "Fetch and clear the event queue",
    description = "Advances every open encounter to the current time, then returns \
        and removes every queued lifecycle record and message. Delivery is at least \
        once: consumers should de-duplicate on event_id.",
    responses(
        (status = 200, description = "Queued events", body = FetchEventsResponse)
    )
)]
pub async fn fetch_events(State(state): State<SharedState>) -> ApiResult<Json<FetchEventsResponse>> {
    let events = state
        .with_tracker(|tracker| tracker.fetch_events(Utc::now()))
        .await?;
    Ok(Json(FetchEventsResponse { events }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use serde_json::json;

    #[tokio::test]
    async fn test_transient_encounter_is_reported() {
        let (server, _dir) = test_server();
        server
            .put("/api/friends")
            .json(&json!({"friend_list": "Lee-100-300-lee-tag"}))
            .await
            .assert_status_ok();

        let now = Utc::now().timestamp_millis();
        let payload = |kind: &str, millis: i64| {
            json!({
                "campaign_name": "beacon",
                "trigger_kind": kind,
                "match_payload": {
                    "majorId": "100",
                    "minorId": "300",
                    "triggerTimeInMilli": millis.to_string()
                }
            })
        };
        // An exit ten minutes ago outlived the two-minute transient timeout.
        server
            .post("/api/triggers")
            .json(&json!({"triggers": [
                payload("enter", now - 11 * 60_000),
                payload("exit", now - 10 * 60_000)
            ]}))
            .await
            .assert_status_ok();

        let body: serde_json::Value = server.post("/api/events/fetch").await.json();
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "start_transient_encounter");
        assert_eq!(events[1]["event_type"], "end_transient_encounter");
        assert_eq!(events[1]["kontakt_beacon_id"], "lee-tag");
        assert_eq!(events[1]["num_events"], 0);

        let again: FetchEventsResponse = server.post("/api/events/fetch").await.json();
        assert!(again.events.is_empty());
    }
}
