//! Trigger batch delivery.
//!
//! The detection SDK (or a bridge in front of it) posts raw trigger batches
//! here. Every delivered batch is acknowledged exactly once, whatever happens
//! to the individual triggers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use encounter_core::{BatchSummary, RawTrigger, TriggerBatch};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// A batch of raw detection triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TriggerBatchRequest {
    /// Triggers in delivery order.
    #[serde(default)]
    pub triggers: Vec<RawTrigger>,
}

/// Deliver a trigger batch.
#[utoipa::path(
    post,
    path = "/api/triggers",
    tag = "triggers",
    operation_id = "deliverTriggers",
    summary = "Deliver a raw trigger batch",
    description = "Classifies each trigger, applies the beacon events of known friends \
        in observation order and persists the result. Triggers that are not enter/exit \
        detections of a known friend are skipped, not rejected.",
    request_body = TriggerBatchRequest,
    responses(
        (status = 200, description = "Batch processed", body = BatchSummary)
    )
)]
pub async fn deliver_triggers(
    State(state): State<SharedState>,
    Json(request): Json<TriggerBatchRequest>,
) -> ApiResult<Json<BatchSummary>> {
    let received_at = Utc::now();
    let summary = state
        .with_tracker(move |tracker| {
            let batch = TriggerBatch::new(request.triggers)
                .on_acknowledge(|count| debug!(count, "trigger batch acknowledged"));
            tracker.handle_batch(batch, received_at)
        })
        .await?;
    Ok(Json(summary))
}
