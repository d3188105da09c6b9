use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    response::IntoResponse,
};

use murmur_engine::blocking;
use murmur_types::api::{UserEnvelope, UserLookupQuery};

use crate::auth::AppState;
use crate::error::{ApiResult, required};

/// Resolve a username to its public profile, e.g. before opening a DM.
pub async fn by_username(
    State(state): State<AppState>,
    query: Result<Query<UserLookupQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let username = required(query.username, "username")?;

    let users = state.engine.users.clone();
    let user = blocking(move || users.by_username(&username)).await?;
    Ok(Json(UserEnvelope { user }))
}
