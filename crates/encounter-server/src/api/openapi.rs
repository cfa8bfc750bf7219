//! OpenAPI specification generation for the encounter tracker API.
//!
//! The generated document describes the configuration surface, trigger
//! delivery and the event drain for whoever bridges the detection SDK and the
//! downstream consumer.

use axum::Json;
use encounter_core::{
    BatchSummary, Direction, EncounterRecord, EncounterReport, EndReason, Friend, GapStats,
    MessageRecord, OutboundEvent, Phase, RawTrigger, Thresholds, TrackerStatus,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::events::FetchEventsResponse;
use super::friends::{FriendsResponse, SetFriendListRequest};
use super::health::HealthResponse;
use super::thresholds::UpdateThresholdsRequest;
use super::triggers::TriggerBatchRequest;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "encounter tracker API",
        version = "0.1.0",
        description = r#"
# encounter tracker API

Detects proximity encounters between a participant and beacon-tagged friends
from batched enter/exit detections.

## Overview

1. **Friends**: configure which beacons belong to which friend
2. **Thresholds**: tune when contact becomes an actual encounter and when it ends
3. **Triggers**: deliver raw detection batches
4. **Events**: fetch and clear the lifecycle records produced so far

An encounter starts TRANSIENT on the first enter, becomes ACTUAL after
`min_duration_secs` without an outstanding exit, and ends when an exit goes
unanswered for the phase's timeout or when it reaches `max_encounter_age_secs`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local encounter tracker")
    ),
    tags(
        (name = "system", description = "Health checks and debug status"),
        (name = "friends", description = "Friend directory"),
        (name = "thresholds", description = "Durations governing the encounter state machine"),
        (name = "triggers", description = "Raw detection batch delivery"),
        (name = "events", description = "Outbound lifecycle records")
    ),
    paths(
        super::health::health_check,
        super::friends::get_friends,
        super::friends::set_friend_list,
        super::thresholds::get_thresholds,
        super::thresholds::update_thresholds,
        super::triggers::deliver_triggers,
        super::events::fetch_events,
        super::status::get_status,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            Friend,
            FriendsResponse,
            SetFriendListRequest,
            Thresholds,
            UpdateThresholdsRequest,
            Direction,
            RawTrigger,
            TriggerBatchRequest,
            BatchSummary,
            Phase,
            EndReason,
            GapStats,
            EncounterRecord,
            EncounterReport,
            MessageRecord,
            OutboundEvent,
            FetchEventsResponse,
            TrackerStatus,
        )
    )
)]
pub struct ApiDoc;
