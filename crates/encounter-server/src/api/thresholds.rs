//! Threshold API endpoints.
//!
//! The four durations are independent: no ordering between them is enforced.

use axum::extract::State;
use axum::Json;
use encounter_core::{Threshold, Thresholds};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Update any subset of the thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "min_duration_secs": 300,
    "max_encounter_age_hours": 8.0
}))]
pub struct UpdateThresholdsRequest {
    /// Time after the first enter at which an encounter becomes actual.
    #[serde(default)]
    pub min_duration_secs: Option<u64>,

    /// Exit timeout for transient encounters.
    #[serde(default)]
    pub transient_timeout_secs: Option<u64>,

    /// Exit timeout for actual encounters.
    #[serde(default)]
    pub actual_timeout_secs: Option<u64>,

    /// Maximum age of an actual encounter, in seconds.
    #[serde(default)]
    pub max_encounter_age_secs: Option<u64>,

    /// Maximum age of an actual encounter, in hours. Exclusive with the seconds form.
    #[serde(default)]
    pub max_encounter_age_hours: Option<f64>,
}

impl UpdateThresholdsRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.max_encounter_age_secs.is_some() && self.max_encounter_age_hours.is_some() {
            return Err(ApiError::BadRequest {
                error_code: "conflicting_max_age".to_string(),
                message: "Give max_encounter_age_secs or max_encounter_age_hours, not both"
                    .to_string(),
            });
        }
        if let Some(hours) = self.max_encounter_age_hours {
            if !hours.is_finite() || hours < 0.0 {
                return Err(ApiError::BadRequest {
                    error_code: "invalid_max_age".to_string(),
                    message: "max_encounter_age_hours must be a non-negative number".to_string(),
                });
            }
        }
        Ok(())
    }

    fn updates(&self) -> impl Iterator<Item = (Threshold, u64)> {
        [
            (Threshold::MinDuration, self.min_duration_secs),
            (Threshold::TransientTimeout, self.transient_timeout_secs),
            (Threshold::ActualTimeout, self.actual_timeout_secs),
            (Threshold::MaxEncounterAge, self.max_encounter_age_secs),
        ]
        .into_iter()
        .filter_map(|(threshold, secs)| secs.map(|secs| (threshold, secs)))
    }
}

/// Get the thresholds in force.
#[utoipa::path(
    get,
    path = "/api/thresholds",
    tag = "thresholds",
    operation_id = "getThresholds",
    summary = "Get thresholds",
    responses(
        (status = 200, description = "Thresholds in force", body = Thresholds)
    )
)]
pub async fn get_thresholds(State(state): State<SharedState>) -> Json<Thresholds> {
    Json(state.tracker().thresholds())
}

/// Update thresholds.
#[utoipa::path(
    put,
    path = "/api/thresholds",
    tag = "thresholds",
    operation_id = "updateThresholds",
    summary = "Update thresholds",
    description = "Sets any subset of the four durations and persists each. \
        The wake-up is re-armed if a deadline moved earlier.",
    request_body = UpdateThresholdsRequest,
    responses(
        (status = 200, description = "Thresholds updated", body = Thresholds),
        (status = 400, description = "Conflicting or invalid values", body = super::error::ErrorResponse)
    )
)]
pub async fn update_thresholds(
    State(state): State<SharedState>,
    Json(request): Json<UpdateThresholdsRequest>,
) -> ApiResult<Json<Thresholds>> {
    request.validate()?;
    let thresholds = state
        .with_tracker(move |tracker| -> encounter_core::Result<Thresholds> {
            for (threshold, secs) in request.updates() {
                tracker.set_threshold(threshold, secs)?;
            }
            if let Some(hours) = request.max_encounter_age_hours {
                tracker.set_max_encounter_age_hours(hours)?;
            }
            Ok(tracker.thresholds())
        })
        .await??;
    Ok(Json(thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_defaults() {
        let (server, _dir) = test_server();
        let thresholds: Thresholds = server.get("/api/thresholds").await.json();
        assert_eq!(thresholds, Thresholds::default());
    }

    #[tokio::test]
    async fn test_partial_update() {
        let (server, _dir) = test_server();
        let response = server
            .put("/api/thresholds")
            .json(&json!({"actual_timeout_secs": 900, "max_encounter_age_hours": 8760.0}))
            .await;
        response.assert_status_ok();

        let thresholds: Thresholds = server.get("/api/thresholds").await.json();
        assert_eq!(thresholds.actual_timeout_secs, 900);
        assert_eq!(thresholds.max_encounter_age_secs, 365 * 86_400);
        assert_eq!(thresholds.min_duration_secs, 300);
    }

    #[tokio::test]
    async fn test_conflicting_max_age() {
        let (server, _dir) = test_server();
        server
            .put("/api/thresholds")
            .json(&json!({"max_encounter_age_secs": 60, "max_encounter_age_hours": 1.0}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_updates_skip_absent_fields() {
        let request = UpdateThresholdsRequest {
            transient_timeout_secs: Some(30),
            ..UpdateThresholdsRequest::default()
        };
        let updates: Vec<_> = request.updates().collect();
        assert_eq!(updates, vec![(Threshold::TransientTimeout, 30)]);
    }
}
