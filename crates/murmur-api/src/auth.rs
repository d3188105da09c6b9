use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use murmur_cache::TypingStore;
use murmur_db::models::to_db_time;
use murmur_engine::{Engine, EngineError, blocking};
use murmur_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UserEnvelope,
};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
    pub typing: TypingStore,
    pub jwt_secret: String,
}

const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    // Hashing is CPU-bound, keep it off the async workers with the DB calls
    let db = state.engine.db.clone();
    let username = req.username.clone();
    let user_id = blocking(move || {
        if db.get_user_by_username(&req.username)?.is_some() {
            return Ok(None);
        }
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow!("password hashing failed: {}", e))?
            .to_string();

        let user_id = Uuid::new_v4().to_string();
        match db.create_user(&user_id, &req.username, &password_hash, &to_db_time(Utc::now())) {
            Ok(()) => Ok(Some(user_id)),
            // A concurrent registration took the name after the check above
            Err(e) if murmur_db::is_constraint_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    })
    .await?
    .ok_or_else(|| ApiError::Conflict("username already taken".into()))?;

    info!("Registered user '{}' ({})", username, user_id);
    let token = issue_token(&state.jwt_secret, &user_id, &username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    let db = state.engine.db.clone();
    let user = blocking(move || {
        let Some(user) = db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };
        let parsed = PasswordHash::new(&user.password)
            .map_err(|e| anyhow!("stored hash for '{}' unreadable: {}", user.id, e))?;
        let verified = Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed)
            .is_ok();
        Ok(verified.then_some(user))
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let token = issue_token(&state.jwt_secret, &user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

/// Echo the bearer's account. A valid token whose user has since been
/// deleted is rejected like a bad one.
pub async fn verify(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserEnvelope>> {
    let users = state.engine.users.clone();
    match blocking(move || users.by_id(&claims.sub)).await {
        Ok(user) => Ok(Json(UserEnvelope { user })),
        Err(EngineError::NotFound(_)) => Err(ApiError::Unauthorized),
        Err(e) => Err(e.into()),
    }
}

fn issue_token(secret: &str, user_id: &str, username: &str) -> ApiResult<String> {
    create_token(secret, user_id, username).map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiError::Internal
    })
}

/// HS256 bearer token valid for 30 days.
pub fn create_token(secret: &str, user_id: &str, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: (Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
