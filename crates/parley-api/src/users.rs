use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use parley_types::api::{LoginRequest, LoginResponse, SignupRequest, UpdatePublicKeyRequest, UserOut};
use parley_types::models::UserIdentity;

use crate::error::ApiError;
use crate::{AppState, blocking};

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_signup(&req)?;

    let db = state.db.clone();
    let user = blocking(move || {
        if db.user_exists(&req.username, &req.email)? {
            return Err(ApiError::Conflict("Username or email already registered".into()));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?
            .to_string();

        let id = db.create_user(&req.username, &req.email, &password_hash, &req.public_key)?;

        Ok(UserOut {
            id,
            username: req.username,
            email: req.email,
            public_key: req.public_key,
            unread_count: 0,
        })
    })
    .await?;

    info!(user_id = user.id, "registered {}", user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

fn validate_signup(req: &SignupRequest) -> Result<(), ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    if !req.email.contains('@') {
        return Err(ApiError::BadRequest("email is not valid".into()));
    }
    if req.public_key.trim().is_empty() {
        return Err(ApiError::BadRequest("publicKey is required".into()));
    }
    Ok(())
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || {
        let user = db
            .get_user_by_email(&req.email)?
            .ok_or(ApiError::Unauthorized)?;

        let parsed_hash = PasswordHash::new(&user.password_hash)
            .map_err(|e| ApiError::Internal(format!("stored hash for user {} is corrupt: {}", user.id, e)))?;

        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(user)
    })
    .await?;

    let access_token = state
        .auth
        .issue_token(user.id)
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".into(),
        username: user.username,
        user_id: user.id,
        public_key: user.public_key,
    }))
}

/// Everyone except the caller, with how many of their messages the caller
/// has not read yet.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(me): Extension<UserIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking(move || Ok(db.list_users_except(me.id)?)).await?;

    let users: Vec<UserOut> = rows
        .into_iter()
        .map(|row| UserOut {
            id: row.id,
            username: row.username,
            email: row.email,
            public_key: row.public_key,
            unread_count: row.unread_count,
        })
        .collect();

    Ok(Json(users))
}

/// Rotates the caller's public key and tells every online client.
pub async fn update_public_key(
    State(state): State<AppState>,
    Extension(me): Extension<UserIdentity>,
    Json(req): Json<UpdatePublicKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.public_key.trim().is_empty() {
        return Err(ApiError::BadRequest("publicKey is required".into()));
    }

    let db = state.db.clone();
    let key = req.public_key.clone();
    let updated = blocking(move || Ok(db.update_public_key(me.id, &key)?)).await?;
    if !updated {
        return Err(ApiError::NotFound(format!("user {}", me.id)));
    }

    state
        .gateway
        .dispatcher()
        .identity_change(me.id, req.public_key)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{call, register, state};

    #[tokio::test]
    async fn signup_login_and_directory() {
        let state = state();
        let (alice, token) = register(&state, "alice").await;
        let (bob, _) = register(&state, "bob").await;

        let (status, users) = call(&state, "GET", "/users/all", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let users = users.as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["id"], bob);
        assert_eq!(users[0]["publicKey"], "bob-pk");
        assert_eq!(users[0]["unreadCount"], 0);
        assert!(users.iter().all(|u| u["id"] != alice));
    }

    #[tokio::test]
    async fn duplicate_and_invalid_signups_are_rejected() {
        let state = state();
        register(&state, "alice").await;

        let dup = json!({
            "username": "alice2",
            "email": "alice@example.com",
            "password": "long enough pw",
            "publicKey": "pk",
        });
        let (status, body) = call(&state, "POST", "/users/signup", None, Some(dup)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let short = json!({
            "username": "carol",
            "email": "carol@example.com",
            "password": "short",
            "publicKey": "pk",
        });
        let (status, _) = call(&state, "POST", "/users/signup", None, Some(short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_password_and_missing_token_are_unauthorized() {
        let state = state();
        register(&state, "alice").await;

        let bad = json!({"email": "alice@example.com", "password": "nope nope nope"});
        let (status, _) = call(&state, "POST", "/users/login", None, Some(bad)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&state, "GET", "/users/all", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&state, "GET", "/users/all", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn key_rotation_updates_directory() {
        let state = state();
        let (_, alice_token) = register(&state, "alice").await;
        let (_, bob_token) = register(&state, "bob").await;

        let (status, _) = call(
            &state,
            "PUT",
            "/users/me/public-key",
            Some(&alice_token),
            Some(json!({"publicKey": "alice-pk-2"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, users) = call(&state, "GET", "/users/all", Some(&bob_token), None).await;
        assert_eq!(users[0]["publicKey"], "alice-pk-2");
    }
}
