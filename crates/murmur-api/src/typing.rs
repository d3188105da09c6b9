use axum::{
    Extension, Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    response::IntoResponse,
};

use murmur_types::api::{Claims, OkResponse, TypingQuery, TypingRequest, TypingUsersResponse};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, required};
use crate::messages::NO_STORE;

pub async fn set_typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<TypingRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    if req.room_id.trim().is_empty() {
        return Err(ApiError::missing("roomId"));
    }

    if req.is_typing {
        state.typing.set_typing(&req.room_id, &claims.sub, &req.username).await;
    } else {
        state.typing.clear_typing(&req.room_id, &claims.sub).await;
    }
    Ok(Json(OkResponse { ok: true }))
}

/// Display names of everyone else typing in the room.
pub async fn get_typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<TypingQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let room_id = required(query.room_id, "roomId")?;

    let users = state.typing.list_typing(&room_id, &claims.sub).await;
    Ok((NO_STORE, Json(TypingUsersResponse { users })))
}
