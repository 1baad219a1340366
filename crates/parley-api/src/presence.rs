use axum::{Json, extract::State};

use parley_types::api::OnlineUsersResponse;

use crate::AppState;

/// Snapshot of who is connected right now.
pub async fn online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    let online_user_ids = state.gateway.presence().online_users().await;
    Json(OnlineUsersResponse { online_user_ids })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use parley_gateway::registry::ConnectionHandle;
    use serde_json::json;

    use crate::test_support::{call, register, state};

    #[tokio::test]
    async fn reports_connected_users() {
        let state = state();
        let (alice, token) = register(&state, "alice").await;

        let (status, body) = call(&state, "GET", "/presence/online", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"onlineUserIds": []}));

        let (handle, _rx) = ConnectionHandle::channel(alice, 8);
        state.gateway.presence().on_connect(handle).await;

        let (_, body) = call(&state, "GET", "/presence/online", Some(&token), None).await;
        assert_eq!(body, json!({"onlineUserIds": [alice]}));
    }
}
