//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Liveness and event backlog
//! - `friends` - Friend directory
//! - `thresholds` - Encounter thresholds
//! - `triggers` - Raw trigger batch delivery
//! - `events` - Fetch-and-clear of outbound events
//! - `status` - Debug view of tracker state
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod friends;
pub mod health;
pub mod openapi;
pub mod status;
pub mod thresholds;
pub mod triggers;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Liveness and backlog
/// /api
/// ├── /friends           - Friend directory (GET, PUT)
/// ├── /thresholds        - Thresholds (GET, PUT)
/// ├── /triggers          - Trigger batch delivery (POST)
/// ├── /events/fetch      - Fetch and clear queued events (POST)
/// ├── /status            - Debug status
/// └── /openapi.json      - OpenAPI specification
/// /swagger-ui            - Interactive API documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .route(
                    "/friends",
                    get(friends::get_friends).put(friends::set_friend_list),
                )
                .route(
                    "/thresholds",
                    get(thresholds::get_thresholds).put(thresholds::update_thresholds),
                )
                .route("/triggers", post(triggers::deliver_triggers))
                .route("/events/fetch", post(events::fetch_events))
                .route("/status", get(status::get_status))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Test server over a tracker backed by a temporary data directory.
#[cfg(test)]
pub(crate) fn test_server() -> (axum_test::TestServer, tempfile::TempDir) {
    use std::sync::Arc;

    use encounter_core::{EncounterTracker, JsonFileStore, NoAlarm};

    use crate::alarm::LogNotifier;
    use crate::state::AppState;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let tracker = EncounterTracker::new(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoAlarm),
        Arc::new(LogNotifier),
    );
    let server = axum_test::TestServer::new(create_router(AppState::new(Arc::new(tracker))))
        .expect("test server");
    (server, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (server, _dir) = test_server();
        let response = server.get("/health").await;
        response.assert_status_ok();
        let health: health::HealthResponse = response.json();
        assert_eq!(health.status, "ok");
        assert_eq!(health.friends, 0);
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let (server, _dir) = test_server();
        let spec: serde_json::Value = server.get("/api/openapi.json").await.json();
        assert_eq!(spec["info"]["title"], "encounter tracker API");
    }
}
