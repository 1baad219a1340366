use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use tracing::debug;

use parley_gateway::auth::Authenticator;

use crate::AppState;
use crate::error::ApiError;

/// Validate the bearer token and attach the caller's `UserIdentity` to the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;
    let token = bearer.token().to_string();

    let auth = state.auth.clone();
    let identity = crate::blocking(move || {
        auth.authenticate(&token).map_err(|e| {
            debug!("rejecting bearer token: {}", e);
            ApiError::Unauthorized
        })
    })
    .await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
