//! Liveness endpoint.
//!
//! Besides the build version it reports how many friends are tracked and how
//! deep the undelivered event backlog is, so a consumer that stopped draining
//! shows up in monitoring before the queue file grows large.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::ApiResult;
use crate::state::SharedState;

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "friends": 2,
    "queued_events": 4
}))]
pub struct HealthResponse {
    /// Always `ok` when the tracker answered.
    #[schema(example = "ok")]
    pub status: String,

    /// Crate version of this build.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Friends in the directory.
    #[schema(example = 2)]
    pub friends: usize,

    /// Outbound records waiting for the next fetch.
    #[schema(example = 4)]
    pub queued_events: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Liveness and backlog",
    description = "Answers once the tracker lock can be taken. A steadily rising \
        `queued_events` means nobody is calling the fetch endpoint.",
    responses(
        (status = 200, description = "Tracker is responsive", body = HealthResponse),
        (status = 500, description = "Tracker task failed", body = super::error::ErrorResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> ApiResult<Json<HealthResponse>> {
    let (friends, queued_events) = state
        .with_tracker(|tracker| (tracker.friends().len(), tracker.queued_events()))
        .await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        friends,
        queued_events,
    }))
}
