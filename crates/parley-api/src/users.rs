use axum::{Extension, Json, extract::Path, extract::State};

use parley_types::api::{Claims, UserResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::parse_timestamp;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .db
        .get_user_by_id(claims.sub)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
        created_at: parse_timestamp(&user.created_at),
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.db.get_user_by_id(user_id)?.ok_or(ApiError::NotFound)?;

    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
        created_at: parse_timestamp(&user.created_at),
    }))
}
