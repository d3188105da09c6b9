//! Row types as stored in SQLite, kept separate from the wire models.
use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_online: bool,
    pub last_seen: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub name: Option<String>,
    pub is_private: bool,
    pub is_direct: bool,
    pub creator_id: String,
    pub created_at: String,
}

/// `content` is exactly what is stored: ciphertext blob or legacy plaintext.
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub kind: String,
    pub content: String,
    pub created_at: String,
}

/// One direct room seen from one member: the room and the other member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectRoomRow {
    pub room_id: String,
    pub peer_id: String,
}

/// Fixed-width UTC timestamp (`2024-05-01T12:00:00.000000Z`). Every row uses
/// this form so that text ordering in SQL is chronological ordering.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}
