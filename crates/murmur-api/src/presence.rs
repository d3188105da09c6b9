use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};

use murmur_engine::blocking;
use murmur_types::api::{Claims, HeartbeatRequest, OnlineUsersResponse, SuccessResponse};

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::messages::NO_STORE;

/// Public: who is online right now.
pub async fn list_online(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let presence = state.engine.presence.clone();
    let users = blocking(move || presence.list_online()).await?;
    Ok((NO_STORE, Json(OnlineUsersResponse { users })))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let presence = state.engine.presence.clone();
    let user_id = claims.sub;
    blocking(move || presence.heartbeat(&user_id, req.is_online)).await?;
    Ok(Json(SuccessResponse { success: true }))
}
