use std::sync::Arc;

use tracing::warn;

use murmur_db::Database;
use murmur_db::models::{UserRow, from_db_time};
use murmur_types::models::UserProfile;

use crate::{EngineError, Result};

/// Account lookups. Password hashes never leave this module.
#[derive(Clone)]
pub struct UserDirectory {
    db: Arc<Database>,
}

impl UserDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn by_username(&self, username: &str) -> Result<UserProfile> {
        self.db
            .get_user_by_username(username.trim())?
            .map(to_profile)
            .ok_or(EngineError::NotFound("user"))
    }

    pub fn by_id(&self, user_id: &str) -> Result<UserProfile> {
        self.db
            .get_user_by_id(user_id)?
            .map(to_profile)
            .ok_or(EngineError::NotFound("user"))
    }
}

fn to_profile(row: UserRow) -> UserProfile {
    let created_at = from_db_time(&row.created_at).unwrap_or_else(|e| {
        warn!("User '{}': {}", row.id, e);
        Default::default()
    });
    UserProfile {
        id: row.id,
        username: row.username,
        created_at,
    }
}
