//! Friend directory API endpoints.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use encounter_core::Friend;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Replace the friend list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "friend_list": "Sam-100-200, Lee-100-300-lee-tag"
}))]
pub struct SetFriendListRequest {
    /// Comma-separated `name-majorId-minorId[-tag]` records.
    pub friend_list: String,
}

/// The friend directory.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FriendsResponse {
    /// Friends in list order; the first match wins on lookup.
    pub friends: Vec<Friend>,
}

/// Get the friend directory.
#[utoipa::path(
    get,
    path = "/api/friends",
    tag = "friends",
    operation_id = "getFriends",
    summary = "List friends",
    responses(
        (status = 200, description = "Friend directory", body = FriendsResponse)
    )
)]
pub async fn get_friends(State(state): State<SharedState>) -> Json<FriendsResponse> {
    Json(FriendsResponse {
        friends: state.tracker().friends(),
    })
}

/// Replace the friend directory.
#[utoipa::path(
    put,
    path = "/api/friends",
    tag = "friends",
    operation_id = "setFriendList",
    summary = "Replace the friend list",
    description = "Parses and stores a new friend list. The whole list is rejected \
        if any record lacks a name, majorId or minorId. Open encounters \
        run to completion even if their friend is removed.",
    request_body = SetFriendListRequest,
    responses(
        (status = 200, description = "Friend list replaced", body = FriendsResponse),
        (status = 400, description = "Malformed record", body = super::error::ErrorResponse)
    )
)]
pub async fn set_friend_list(
    State(state): State<SharedState>,
    Json(request): Json<SetFriendListRequest>,
) -> ApiResult<Json<FriendsResponse>> {
    let friends = state
        .with_tracker(move |tracker| tracker.set_friend_list(&request.friend_list, Utc::now()))
        .await??;
    Ok(Json(FriendsResponse { friends }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get_friends() {
        let (server, _dir) = test_server();

        let response = server
            .put("/api/friends")
            .json(&json!({"friend_list": "Sam-100-200, Lee-100-300-lee-tag"}))
            .await;
        response.assert_status_ok();

        let listed: FriendsResponse = server.get("/api/friends").await.json();
        assert_eq!(listed.friends.len(), 2);
        assert_eq!(listed.friends[0].tag, "100-200");
        assert_eq!(listed.friends[1].tag, "lee-tag");
    }

    #[tokio::test]
    async fn test_malformed_list_is_rejected() {
        let (server, _dir) = test_server();

        let response = server
            .put("/api/friends")
            .json(&json!({"friend_list": "Sam-100-200, Lee"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "malformed_friend_record");

        let listed: FriendsResponse = server.get("/api/friends").await.json();
        assert!(listed.friends.is_empty());
    }

    #[tokio::test]
    async fn test_record_with_empty_minor_id_is_rejected() {
        let (server, _dir) = test_server();

        let response = server
            .put("/api/friends")
            .json(&json!({"friend_list": "Sam-100-"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
