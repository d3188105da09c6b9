use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use murmur_db::Database;
use murmur_db::models::{UserRow, from_db_time, to_db_time};
use murmur_types::models::User;

use crate::{EngineError, Result};

/// A user with no heartbeat for this long is offline.
pub const PRESENCE_STALENESS: Duration = Duration::from_secs(60);

/// Binary online/offline state driven by client heartbeats.
#[derive(Clone)]
pub struct PresenceTracker {
    db: Arc<Database>,
    staleness: chrono::Duration,
}

impl PresenceTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            staleness: chrono::Duration::seconds(PRESENCE_STALENESS.as_secs() as i64),
        }
    }

    pub fn heartbeat(&self, user_id: &str, is_online: bool) -> Result<()> {
        self.heartbeat_at(user_id, is_online, Utc::now())
    }

    /// Expire silent users, then list whoever is still online by username.
    pub fn list_online(&self) -> Result<Vec<User>> {
        self.list_online_at(Utc::now())
    }

    fn heartbeat_at(&self, user_id: &str, is_online: bool, now: DateTime<Utc>) -> Result<()> {
        match self.db.set_presence(user_id, is_online, &to_db_time(now))? {
            0 => Err(EngineError::NotFound("user")),
            _ => Ok(()),
        }
    }

    fn list_online_at(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        let cutoff = to_db_time(now - self.staleness);
        let expired = self.db.expire_stale_presence(&cutoff)?;
        if expired > 0 {
            debug!("Marked {} stale user(s) offline", expired);
        }

        let rows = self.db.list_online_users(&cutoff)?;
        Ok(rows.into_iter().map(to_user).collect())
    }
}

fn to_user(row: UserRow) -> User {
    let last_seen = from_db_time(&row.last_seen).unwrap_or_else(|e| {
        warn!("User '{}': {}", row.id, e);
        DateTime::default()
    });
    User {
        id: row.id,
        username: row.username,
        is_online: row.is_online,
        last_seen,
    }
}
