use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::{RoomRow, from_db_time, to_db_time};
use murmur_db::queries::NewRoom;
use murmur_types::models::Room;

use crate::{EngineError, Result};

/// Room lookup and membership. Direct rooms are created on demand, one per
/// pair of users.
#[derive(Clone)]
pub struct RoomDirectory {
    db: Arc<Database>,
}

impl RoomDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a named room and make the creator its first member.
    pub fn create_room(&self, creator_id: &str, name: &str, is_private: bool) -> Result<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("room name is required".into()));
        }
        if self.db.get_room_by_name(name)?.is_some() {
            return Err(EngineError::Validation(format!("room '{}' already exists", name)));
        }

        let id = Uuid::new_v4().to_string();
        let now = to_db_time(Utc::now());
        self.db.create_room(&NewRoom {
            id: &id,
            name: Some(name),
            is_private,
            is_direct: false,
            creator_id,
            created_at: &now,
            members: &[creator_id],
        })?;
        info!("Room '{}' ({}) created by {}", name, id, creator_id);

        self.get(&id)
    }

    /// Join a public room. Private and direct rooms stay hidden.
    pub fn join_room(&self, room_id: &str, user_id: &str) -> Result<Room> {
        let row = match self.db.get_room(room_id)? {
            Some(row) if !row.is_private && !row.is_direct => row,
            _ => return Err(EngineError::NotFound("room")),
        };
        self.db.add_member(room_id, user_id, &to_db_time(Utc::now()))?;
        Ok(to_room(row))
    }

    /// Look a named room up. Private rooms are only found by their members.
    pub fn find_by_name(&self, viewer_id: &str, name: &str) -> Result<Room> {
        let row = match self.db.get_room_by_name(name.trim())? {
            Some(row) if !row.is_private => row,
            Some(row) if self.db.is_member(&row.id, viewer_id)? => row,
            _ => return Err(EngineError::NotFound("room")),
        };
        Ok(to_room(row))
    }

    pub fn rooms_for_user(&self, user_id: &str) -> Result<Vec<Room>> {
        Ok(self
            .db
            .rooms_for_user(user_id)?
            .into_iter()
            .map(to_room)
            .collect())
    }

    /// The direct room between two users, created on first use.
    pub fn get_or_create_direct(&self, user_id: &str, peer_id: &str) -> Result<Room> {
        if user_id == peer_id {
            return Err(EngineError::Validation("cannot open a direct room with yourself".into()));
        }
        if self.db.get_user_by_id(peer_id)?.is_none() {
            return Err(EngineError::NotFound("user"));
        }
        if let Some(room_id) = self.db.find_direct_room(user_id, peer_id)? {
            return self.get(&room_id);
        }

        let id = Uuid::new_v4().to_string();
        let now = to_db_time(Utc::now());
        self.db.create_room(&NewRoom {
            id: &id,
            name: None,
            is_private: true,
            is_direct: true,
            creator_id: user_id,
            created_at: &now,
            members: &[user_id, peer_id],
        })?;
        info!("Direct room {} opened between {} and {}", id, user_id, peer_id);

        // Two concurrent first opens can both insert; everyone converges on
        // the oldest room.
        match self.db.find_direct_room(user_id, peer_id)? {
            Some(room_id) => self.get(&room_id),
            None => self.get(&id),
        }
    }

    /// Non-members get the same answer as for a missing room.
    pub fn ensure_member(&self, room_id: &str, user_id: &str) -> Result<()> {
        if self.db.is_member(room_id, user_id)? {
            Ok(())
        } else {
            Err(EngineError::NotFound("room"))
        }
    }

    pub fn members(&self, room_id: &str) -> Result<Vec<String>> {
        Ok(self.db.room_members(room_id)?)
    }

    pub fn get(&self, room_id: &str) -> Result<Room> {
        self.db
            .get_room(room_id)?
            .map(to_room)
            .ok_or(EngineError::NotFound("room"))
    }
}

fn to_room(row: RoomRow) -> Room {
    let created_at = from_db_time(&row.created_at).unwrap_or_else(|e| {
        warn!("Room '{}': {}", row.id, e);
        Default::default()
    });
    Room {
        id: row.id,
        name: row.name,
        is_private: row.is_private,
        is_direct: row.is_direct,
        creator_id: row.creator_id,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded_db;

    #[test]
    fn created_room_includes_creator() {
        let rooms = RoomDirectory::new(seeded_db());
        let room = rooms.create_room("bob", "  general ", false).unwrap();
        assert_eq!(room.name.as_deref(), Some("general"));
        assert!(!room.is_direct);
        assert_eq!(rooms.members(&room.id).unwrap(), ["bob"]);

        assert!(matches!(rooms.create_room("carol", "general", true), Err(EngineError::Validation(_))));
        assert!(matches!(rooms.create_room("carol", "", false), Err(EngineError::Validation(_))));
    }

    #[test]
    fn private_and_direct_rooms_cannot_be_joined() {
        let rooms = RoomDirectory::new(seeded_db());
        let secret = rooms.create_room("alice", "secret", true).unwrap();

        assert!(matches!(rooms.join_room(&secret.id, "bob"), Err(EngineError::NotFound("room"))));
        assert!(matches!(rooms.join_room("dm-ab", "carol"), Err(EngineError::NotFound("room"))));

        rooms.join_room("lobby", "bob").unwrap();
        rooms.join_room("lobby", "bob").unwrap();
        assert_eq!(rooms.members("lobby").unwrap(), ["alice", "bob", "carol"]);
    }

    #[test]
    fn lookup_by_name_hides_private_rooms() {
        let rooms = RoomDirectory::new(seeded_db());
        assert_eq!(rooms.find_by_name("bob", "lobby").unwrap().id, "lobby");

        let secret = rooms.create_room("alice", "secret", true).unwrap();
        assert_eq!(rooms.find_by_name("alice", "secret").unwrap().id, secret.id);
        assert!(matches!(rooms.find_by_name("bob", "secret"), Err(EngineError::NotFound("room"))));
        assert!(matches!(rooms.find_by_name("bob", "nowhere"), Err(EngineError::NotFound("room"))));
    }

    #[test]
    fn direct_room_is_reused() {
        let rooms = RoomDirectory::new(seeded_db());
        assert_eq!(rooms.get_or_create_direct("bob", "alice").unwrap().id, "dm-ab");

        let bc = rooms.get_or_create_direct("bob", "carol").unwrap();
        assert!(bc.is_direct && bc.name.is_none());
        assert_eq!(rooms.get_or_create_direct("carol", "bob").unwrap().id, bc.id);
        assert_eq!(rooms.members(&bc.id).unwrap(), ["bob", "carol"]);
    }

    #[test]
    fn direct_room_needs_a_real_peer() {
        let rooms = RoomDirectory::new(seeded_db());
        assert!(matches!(rooms.get_or_create_direct("bob", "bob"), Err(EngineError::Validation(_))));
        assert!(matches!(rooms.get_or_create_direct("bob", "ghost"), Err(EngineError::NotFound("user"))));
    }

    #[test]
    fn membership_check() {
        let rooms = RoomDirectory::new(seeded_db());
        rooms.ensure_member("dm-ab", "alice").unwrap();
        assert!(matches!(rooms.ensure_member("dm-ab", "carol"), Err(EngineError::NotFound("room"))));
        assert_eq!(rooms.rooms_for_user("carol").unwrap().len(), 1);
    }
}
