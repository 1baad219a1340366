use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use parley_gateway::store::MessageStore;
use parley_types::api::HistoryMessage;
use parley_types::models::UserIdentity;

use crate::error::ApiError;
use crate::{AppState, blocking};

/// Conversation between the caller and `other_id`, oldest first. Each row
/// carries the content key wrapped for the caller.
pub async fn get_history(
    State(state): State<AppState>,
    Path(other_id): Path<i64>,
    Extension(me): Extension<UserIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let messages = blocking(move || Ok(db.query_history(me.id, other_id)?)).await?;

    let history: Vec<HistoryMessage> = messages
        .iter()
        .map(|m| HistoryMessage {
            id: m.id,
            sender_id: m.sender_id,
            recipient_id: m.recipient_id,
            ciphertext: m.ciphertext.clone(),
            encrypted_key: m.encrypted_key_for(me.id).to_string(),
            iv_nonce: m.iv_nonce.clone(),
            is_read: m.is_read,
            timestamp: m.timestamp,
        })
        .collect();

    Ok(Json(history))
}
