use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::IntoResponse,
};

use murmur_engine::blocking;
use murmur_types::api::{
    Claims, CreateRoomRequest, DirectMessageQuery, DirectRoomResponse, RoomEnvelope,
    RoomLookupQuery, RoomsResponse,
};

use crate::auth::AppState;
use crate::error::{ApiResult, required};
use crate::messages::NO_STORE;

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let rooms = state.engine.rooms.clone();
    let room = blocking(move || rooms.create_room(&claims.sub, &req.name, req.is_private)).await?;
    Ok((StatusCode::CREATED, Json(RoomEnvelope { room })))
}

pub async fn join_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let rooms = state.engine.rooms.clone();
    let room = blocking(move || rooms.join_room(&room_id, &claims.sub)).await?;
    Ok(Json(RoomEnvelope { room }))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let rooms = state.engine.rooms.clone();
    let rooms = blocking(move || rooms.rooms_for_user(&claims.sub)).await?;
    Ok(Json(RoomsResponse { rooms }))
}

pub async fn room_by_name(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<RoomLookupQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let name = required(query.name, "name")?;

    let rooms = state.engine.rooms.clone();
    let room = blocking(move || rooms.find_by_name(&claims.sub, &name)).await?;
    Ok(Json(RoomEnvelope { room }))
}

/// Open the direct room with `userId`, creating it on first contact.
pub async fn direct_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<DirectMessageQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let peer_id = required(query.user_id, "userId")?;

    let (room, messages) = state.engine.sync.open_direct(&claims.sub, &peer_id).await?;
    Ok((NO_STORE, Json(DirectRoomResponse { room, messages })))
}
