use std::sync::Arc;

use tracing::warn;

use murmur_crypto::MessageCodec;
use murmur_db::Database;
use murmur_db::models::{MessageRow, from_db_time};
use murmur_types::models::{Message, MessageKind};

use crate::{EngineError, Result};

/// Default page size for cursor polls.
pub const DEFAULT_PAGE: u32 = 50;

/// Upper bound on any single page.
pub const MAX_PAGE: u32 = 200;

/// Append-only per-room message log. Content is encrypted on the way in
/// and decrypted on the way out; callers only ever see plaintext.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
    codec: Arc<MessageCodec>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, codec: Arc<MessageCodec>) -> Self {
        Self { db, codec }
    }

    /// Persist one message and echo it back decrypted.
    pub fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(EngineError::Validation("content is required".into()));
        }
        self.require_room(room_id)?;

        let stored = self.codec.encrypt_if_needed(content);
        let row = self
            .db
            .append_message(room_id, sender_id, kind.as_str(), &stored)?;
        Ok(self.to_message(row))
    }

    /// Messages after `cursor` in id order, at most `limit`.
    /// Re-poll with the last returned id to page forward.
    pub fn list_since(
        &self,
        room_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.require_room(room_id)?;

        let cursor = cursor.filter(|c| !c.is_empty());
        let rows = self
            .db
            .messages_since(room_id, cursor, limit.clamp(1, MAX_PAGE))?;
        Ok(rows.into_iter().map(|row| self.to_message(row)).collect())
    }

    /// The newest `limit` messages, oldest first.
    pub fn latest(&self, room_id: &str, limit: u32) -> Result<Vec<Message>> {
        self.require_room(room_id)?;
        let rows = self.db.latest_messages(room_id, limit.clamp(1, MAX_PAGE))?;
        Ok(rows.into_iter().map(|row| self.to_message(row)).collect())
    }

    fn require_room(&self, room_id: &str) -> Result<()> {
        match self.db.get_room(room_id)? {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound("room")),
        }
    }

    fn to_message(&self, row: MessageRow) -> Message {
        let kind = row.kind.parse().unwrap_or_else(|e| {
            warn!("Message '{}': {}, treating as TEXT", row.id, e);
            MessageKind::Text
        });
        let created_at = from_db_time(&row.created_at).unwrap_or_else(|e| {
            warn!("Message '{}': {}", row.id, e);
            chrono::DateTime::default()
        });

        Message {
            content: self.codec.decrypt(&row.content),
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            kind,
            created_at,
        }
    }
}
