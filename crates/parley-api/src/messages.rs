use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::error;

use parley_types::api::{Claims, MessageResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::parse_timestamp;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Direct-message history with one peer, newest first. This is the
/// synchronous fetch that picks up messages delivered while offline.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let limit = query.limit.min(200);
    let user_id = claims.sub;

    // Run blocking DB work off the async runtime
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        if db.get_user_by_id(peer_id)?.is_none() {
            return Err(ApiError::NotFound);
        }
        Ok(db.conversation(user_id, peer_id, limit)?)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })??;

    let messages = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(messages))
}
