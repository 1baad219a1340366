//! REST surface: accounts, the user directory, chat history and the
//! presence snapshot. Live traffic goes through `parley-gateway`.

pub mod chat;
pub mod error;
pub mod middleware;
pub mod presence;
pub mod users;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use parley_db::Database;
use parley_gateway::Gateway;
use parley_gateway::auth::JwtAuthenticator;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: Arc<JwtAuthenticator>,
    pub gateway: Gateway,
}

/// All REST routes. The WebSocket route is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/users/signup", post(users::signup))
        .route("/users/login", post(users::login));

    let protected_routes = Router::new()
        .route("/users/all", get(users::list_users))
        .route("/users/me/public-key", put(users::update_public_key))
        .route("/chat/history/{other_id}", get(chat::get_history))
        .route("/presence/online", get(presence::online_users))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "message": "Parley relay is running" }))
}

/// Runs blocking work (SQLite, password hashing) off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use parley_gateway::GatewayConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    pub fn state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let auth = Arc::new(JwtAuthenticator::new(
            db.clone(),
            "api-test-secret",
            chrono::Duration::minutes(10),
        ));
        let gateway = Gateway::new(GatewayConfig::default(), auth.clone(), db.clone());
        Arc::new(AppStateInner { db, auth, gateway })
    }

    pub async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Signs a user up and logs them in. Returns (user id, token).
    pub async fn register(state: &AppState, name: &str) -> (i64, String) {
        let (status, _) = call(
            state,
            "POST",
            "/users/signup",
            None,
            Some(serde_json::json!({
                "username": name,
                "email": format!("{name}@example.com"),
                "password": "correct horse battery",
                "publicKey": format!("{name}-pk"),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, login) = call(
            state,
            "POST",
            "/users/login",
            None,
            Some(serde_json::json!({
                "email": format!("{name}@example.com"),
                "password": "correct horse battery",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (
            login["userId"].as_i64().unwrap(),
            login["accessToken"].as_str().unwrap().to_string(),
        )
    }
}
