use axum::{
    Extension, Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{StatusCode, header},
    response::IntoResponse,
};

use murmur_types::api::{
    Claims, MarkReadRequest, MarkReadResponse, MessageEnvelope, MessagesQuery, MessagesResponse,
    SendMessageRequest,
};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, required};

/// Poll responses must never be served from an intermediary cache.
pub(crate) const NO_STORE: [(header::HeaderName, &str); 1] = [(header::CACHE_CONTROL, "no-store")];

/// Poll a room. Without `lastMessageId` this returns the first page; with it,
/// only messages after that id. Returned messages are marked read.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let room_id = required(query.room_id, "roomId")?;

    let messages = state
        .engine
        .sync
        .fetch_new_messages(&claims.sub, &room_id, query.last_message_id.as_deref())
        .await?;

    Ok((NO_STORE, Json(MessagesResponse { messages })))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    if req.room_id.trim().is_empty() {
        return Err(ApiError::missing("roomId"));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::missing("content"));
    }

    let message = state
        .engine
        .sync
        .send_message(&claims.sub, &req.room_id, req.kind, &req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(MessageEnvelope { message })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<MarkReadRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    if req.room_id.trim().is_empty() {
        return Err(ApiError::missing("roomId"));
    }

    let marked = state
        .engine
        .sync
        .mark_read(&claims.sub, &req.room_id, req.up_to_message_id.as_deref())
        .await?;

    Ok(Json(MarkReadResponse {
        success: true,
        marked,
    }))
}
