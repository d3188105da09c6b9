use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};

use murmur_types::api::{Claims, MarkPeerReadRequest, SuccessResponse, UnreadCountsResponse};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::messages::NO_STORE;

pub async fn get_unread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let unread_counts = state.engine.sync.fetch_unread(&claims.sub).await?;
    Ok((NO_STORE, Json(UnreadCountsResponse { unread_counts })))
}

/// Clear everything a peer has sent the caller in their direct room.
pub async fn mark_peer_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<MarkPeerReadRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::missing("userId"));
    }

    state.engine.sync.mark_peer_read(&claims.sub, &req.user_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
