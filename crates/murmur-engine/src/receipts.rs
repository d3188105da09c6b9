use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use murmur_db::Database;
use murmur_db::models::to_db_time;
use murmur_types::models::UnreadCounts;

use crate::{EngineError, Result};

/// Most receipts written by one call. Callers with a deeper backlog call again.
pub const MARK_READ_BATCH: u32 = 200;

/// Durable per-(message, user) read receipts and the unread counts derived
/// from them. Counts are always anti-joins over the receipt table; there is
/// no stored counter to drift.
#[derive(Clone)]
pub struct ReadTracker {
    db: Arc<Database>,
}

impl ReadTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mark other members' messages in `room_id` as read by `user_id`, up to
    /// and including `up_to` when given. Safe to repeat and to race: returns
    /// only the receipts this call created.
    pub fn mark_read(&self, room_id: &str, user_id: &str, up_to: Option<&str>) -> Result<usize> {
        if self.db.get_room(room_id)?.is_none() || !self.db.is_member(room_id, user_id)? {
            return Err(EngineError::NotFound("room"));
        }

        let bound_row = match up_to.filter(|id| !id.is_empty()) {
            Some(id) => match self.db.get_message(id)? {
                Some(row) if row.room_id == room_id => Some(row),
                _ => {
                    debug!("Read bound '{}' not in room {}, marking without bound", id, room_id);
                    None
                }
            },
            None => None,
        };
        let bound = bound_row.as_ref().map(|row| row.id.as_str());

        let marked = self.db.mark_read(
            room_id,
            user_id,
            None,
            bound,
            MARK_READ_BATCH,
            &to_db_time(Utc::now()),
        )?;
        Ok(marked)
    }

    /// Mark everything `peer_id` sent to `viewer_id` in their direct room.
    /// No shared room means nothing to mark.
    pub fn mark_peer_read(&self, viewer_id: &str, peer_id: &str) -> Result<usize> {
        let Some(room_id) = self.db.find_direct_room(viewer_id, peer_id)? else {
            return Ok(0);
        };
        let marked = self.db.mark_read(
            &room_id,
            viewer_id,
            Some(peer_id),
            None,
            MARK_READ_BATCH,
            &to_db_time(Utc::now()),
        )?;
        Ok(marked)
    }

    /// Messages from `peer_id` in the direct room with `viewer_id` that the
    /// viewer has no receipt for.
    pub fn unread_count(&self, viewer_id: &str, peer_id: &str) -> Result<u64> {
        match self.db.find_direct_room(viewer_id, peer_id)? {
            Some(room_id) => Ok(self.db.count_unread(&room_id, viewer_id, peer_id)?),
            None => Ok(0),
        }
    }

    /// Unread count for every direct-room peer of `viewer_id`, zeros included.
    pub fn unread_counts_for_all_peers(&self, viewer_id: &str) -> Result<UnreadCounts> {
        let mut counts = UnreadCounts::new();
        for dm in self.db.direct_rooms_for_user(viewer_id)? {
            let n = self.db.count_unread(&dm.room_id, viewer_id, &dm.peer_id)?;
            *counts.entry(dm.peer_id).or_default() += n;
        }
        Ok(counts)
    }
}
