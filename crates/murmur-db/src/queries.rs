use crate::models::{DirectRoomRow, MessageRow, RoomRow, UserRow, to_db_time};
use crate::Database;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use uuid::Uuid;

/// New room to insert together with its initial members.
pub struct NewRoom<'a> {
    pub id: &'a str,
    pub name: Option<&'a str>,
    pub is_private: bool,
    pub is_direct: bool,
    pub creator_id: &'a str,
    pub created_at: &'a str,
    pub members: &'a [&'a str],
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, is_online, last_seen, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                (id, username, password_hash, now),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, &format!("{USER_COLUMNS} WHERE username = ?1"), username)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, &format!("{USER_COLUMNS} WHERE id = ?1"), id))
    }

    /// Set the online flag and refresh `last_seen`. Returns rows touched
    /// (0 means the user does not exist).
    pub fn set_presence(&self, user_id: &str, is_online: bool, last_seen: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3",
                rusqlite::params![is_online, last_seen, user_id],
            )?;
            Ok(n)
        })
    }

    /// Flip users still flagged online but silent since before `cutoff`.
    pub fn expire_stale_presence(&self, cutoff: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_online = 0 WHERE is_online = 1 AND last_seen < ?1",
                [cutoff],
            )?;
            Ok(n)
        })
    }

    pub fn list_online_users(&self, cutoff: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_COLUMNS} WHERE is_online = 1 AND last_seen >= ?1 ORDER BY username"
            ))?;
            let rows = stmt
                .query_map([cutoff], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Rooms --

    pub fn create_room(&self, room: &NewRoom<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO rooms (id, name, is_private, is_direct, creator_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    room.id,
                    room.name,
                    room.is_private,
                    room.is_direct,
                    room.creator_id,
                    room.created_at
                ],
            )?;
            for member in room.members {
                tx.execute(
                    "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    (room.id, *member, room.created_at),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{ROOM_COLUMNS} WHERE id = ?1"), [id], map_room)
                .optional()
        })
    }

    pub fn get_room_by_name(&self, name: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{ROOM_COLUMNS} WHERE name = ?1"), [name], map_room)
                .optional()
        })
    }

    /// Idempotent join. Returns true if the membership was new.
    pub fn add_member(&self, room_id: &str, user_id: &str, now: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (room_id, user_id, now),
            )?;
            Ok(n > 0)
        })
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
                |r| r.get(0),
            )?;
            Ok(found > 0)
        })
    }

    pub fn room_members(&self, room_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM room_members WHERE room_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([room_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.is_private, r.is_direct, r.creator_id, r.created_at
                 FROM rooms r
                 JOIN room_members m ON m.room_id = r.id
                 WHERE m.user_id = ?1
                 ORDER BY r.created_at, r.id",
            )?;
            let rows = stmt
                .query_map([user_id], map_room)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The direct room shared by two users, if one exists.
    pub fn find_direct_room(&self, user_a: &str, user_b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT r.id
                 FROM rooms r
                 JOIN room_members a ON a.room_id = r.id AND a.user_id = ?1
                 JOIN room_members b ON b.room_id = r.id AND b.user_id = ?2
                 WHERE r.is_direct = 1
                 ORDER BY r.created_at, r.id
                 LIMIT 1",
                (user_a, user_b),
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
    }

    /// Every direct room of `user_id` paired with the other member.
    pub fn direct_rooms_for_user(&self, user_id: &str) -> Result<Vec<DirectRoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, peer.user_id
                 FROM rooms r
                 JOIN room_members me ON me.room_id = r.id AND me.user_id = ?1
                 JOIN room_members peer ON peer.room_id = r.id AND peer.user_id != ?1
                 WHERE r.is_direct = 1
                 ORDER BY r.created_at, r.id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(DirectRoomRow {
                        room_id: row.get(0)?,
                        peer_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Append one message. The id (UUIDv7) and timestamp are assigned while
    /// the writer lock is held, so id order always matches commit order and a
    /// reader that sees a message also sees every message with a smaller id.
    pub fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        kind: &str,
        content: &str,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let id = Uuid::now_v7().to_string();
            let created_at = to_db_time(Utc::now());
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, room_id, sender_id, kind, content, created_at],
            )?;
            let row = conn.query_row(&format!("{MESSAGE_COLUMNS} WHERE m.id = ?1"), [&id], map_message)?;
            Ok(row)
        })
    }

    /// Insert a message with caller-chosen id and timestamp (imports, tests).
    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        kind: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, room_id, sender_id, kind, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{MESSAGE_COLUMNS} WHERE m.id = ?1"), [id], map_message)
                .optional()
        })
    }

    /// Messages of a room in id order, strictly after the cursor id when one
    /// is given. Ordering and the cursor use the same key, so paging never
    /// skips a row whose timestamp sorts out of id order.
    pub fn messages_since(
        &self,
        room_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_COLUMNS}
                 WHERE m.room_id = ?1 AND (?2 IS NULL OR m.id > ?2)
                 ORDER BY m.id
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![room_id, cursor, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The newest `limit` messages of a room, returned oldest first.
    pub fn latest_messages(&self, room_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_COLUMNS}
                 WHERE m.room_id = ?1
                 ORDER BY m.id DESC
                 LIMIT ?2"
            ))?;
            let mut rows = stmt
                .query_map(rusqlite::params![room_id, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Read receipts --

    /// Insert receipts for up to `limit` unread messages of `room_id` not sent
    /// by `user_id`. `sender` narrows to one author; `up_to` is an inclusive
    /// id upper limit. Returns receipts actually created.
    pub fn mark_read(
        &self,
        room_id: &str,
        user_id: &str,
        sender: Option<&str>,
        up_to: Option<&str>,
        limit: u32,
        read_at: &str,
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT m.id
                     FROM messages m
                     LEFT JOIN message_reads r ON r.message_id = m.id AND r.user_id = ?2
                     WHERE m.room_id = ?1
                       AND m.sender_id != ?2
                       AND (?3 IS NULL OR m.sender_id = ?3)
                       AND (?4 IS NULL OR m.id <= ?4)
                       AND r.id IS NULL
                     ORDER BY m.id
                     LIMIT ?5",
                )?;
                stmt.query_map(
                    rusqlite::params![room_id, user_id, sender, up_to, limit],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut created = 0;
            for message_id in &ids {
                created += tx.execute(
                    "INSERT OR IGNORE INTO message_reads (id, message_id, user_id, read_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    (Uuid::new_v4().to_string(), message_id, user_id, read_at),
                )?;
            }
            tx.commit()?;
            Ok(created)
        })
    }

    /// Messages from `sender_id` in `room_id` with no receipt for `viewer_id`.
    pub fn count_unread(&self, room_id: &str, viewer_id: &str, sender_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 LEFT JOIN message_reads r ON r.message_id = m.id AND r.user_id = ?2
                 WHERE m.room_id = ?1
                   AND m.sender_id = ?3
                   AND r.id IS NULL",
                (room_id, viewer_id, sender_id),
                |r| r.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    pub fn count_receipts(&self, message_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_reads WHERE message_id = ?1",
                [message_id],
                |r| r.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

const USER_COLUMNS: &str =
    "SELECT id, username, password, is_online, last_seen, created_at FROM users";

const ROOM_COLUMNS: &str =
    "SELECT id, name, is_private, is_direct, creator_id, created_at FROM rooms";

// JOIN users to fetch sender_username in a single query (eliminates N+1)
const MESSAGE_COLUMNS: &str =
    "SELECT m.id, m.room_id, m.sender_id, u.username, m.type, m.content, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    conn.query_row(sql, [key], map_user).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        is_online: row.get(3)?,
        last_seen: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_room(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_private: row.get(2)?,
        is_direct: row.get(3)?,
        creator_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        kind: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Fixed clock so insertion order never leaks into ordering assertions.
    fn ts(offset_ms: i64) -> String {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        to_db_time(base + Duration::milliseconds(offset_ms))
    }

    fn seed() -> Database {
        let db = Database::open_in_memory().unwrap();
        let now = ts(0);
        db.create_user("alice", "alice", "x", &now).unwrap();
        db.create_user("bob", "bob", "x", &now).unwrap();
        db.create_user("carol", "carol", "x", &now).unwrap();
        db.create_room(&NewRoom {
            id: "dm-ab",
            name: None,
            is_private: true,
            is_direct: true,
            creator_id: "alice",
            created_at: &now,
            members: &["alice", "bob"],
        })
        .unwrap();
        db
    }

    #[test]
    fn messages_since_respects_cursor_and_order() {
        let db = seed();
        db.insert_message("m2", "dm-ab", "alice", "TEXT", "second", &ts(2)).unwrap();
        db.insert_message("m1", "dm-ab", "alice", "TEXT", "first", &ts(1)).unwrap();
        db.insert_message("m3", "dm-ab", "bob", "TEXT", "third", &ts(3)).unwrap();

        let all: Vec<String> = db.messages_since("dm-ab", None, 50).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(all, ["m1", "m2", "m3"]);

        let after: Vec<String> = db.messages_since("dm-ab", Some("m1"), 50).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(after, ["m2", "m3"]);

        assert_eq!(db.messages_since("dm-ab", None, 2).unwrap().len(), 2);
        assert_eq!(db.latest_messages("dm-ab", 2).unwrap()[0].id, "m2");
    }

    #[test]
    fn paging_follows_ids_not_timestamps() {
        let db = seed();
        // timestamps deliberately out of id order
        db.insert_message("m1", "dm-ab", "alice", "TEXT", "a", &ts(5)).unwrap();
        db.insert_message("m2", "dm-ab", "alice", "TEXT", "b", &ts(1)).unwrap();
        db.insert_message("m3", "dm-ab", "alice", "TEXT", "c", &ts(3)).unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = db.messages_since("dm-ab", cursor.as_deref(), 1).unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some(last.id.clone());
            seen.extend(page.into_iter().map(|m| m.id));
        }
        assert_eq!(seen, ["m1", "m2", "m3"]);

        // a bound at m2 covers exactly the rows a poll returned up to m2
        assert_eq!(db.mark_read("dm-ab", "bob", None, Some("m2"), 200, &ts(6)).unwrap(), 2);
        assert_eq!(db.count_receipts("m3").unwrap(), 0);
        assert_eq!(db.latest_messages("dm-ab", 1).unwrap()[0].id, "m3");
    }

    #[test]
    fn duplicate_username_is_a_constraint_violation() {
        let db = seed();
        let err = db.create_user("alice-2", "alice", "x", &ts(1)).unwrap_err();
        assert!(crate::is_constraint_violation(&err));
        assert!(!crate::is_constraint_violation(&anyhow::anyhow!("disk on fire")));
    }

    #[test]
    fn appended_ids_follow_commit_order() {
        let db = seed();
        let first = db.append_message("dm-ab", "alice", "TEXT", "one").unwrap();
        let second = db.append_message("dm-ab", "bob", "TEXT", "two").unwrap();
        assert!(first.id < second.id);
        assert!(first.created_at <= second.created_at);
        assert_eq!(second.sender_username, "bob");
        assert_eq!(db.get_message(&first.id).unwrap().unwrap().content, "one");
    }

    #[test]
    fn mark_read_is_insert_if_absent() {
        let db = seed();
        db.insert_message("m1", "dm-ab", "alice", "TEXT", "a", &ts(1)).unwrap();
        db.insert_message("m2", "dm-ab", "alice", "TEXT", "b", &ts(2)).unwrap();
        db.insert_message("m3", "dm-ab", "bob", "TEXT", "c", &ts(3)).unwrap();

        assert_eq!(db.count_unread("dm-ab", "bob", "alice").unwrap(), 2);
        assert_eq!(db.mark_read("dm-ab", "bob", None, None, 200, &ts(4)).unwrap(), 2);
        assert_eq!(db.mark_read("dm-ab", "bob", None, None, 200, &ts(5)).unwrap(), 0);
        assert_eq!(db.count_unread("dm-ab", "bob", "alice").unwrap(), 0);
        // bob's own message never gets a receipt from bob
        assert_eq!(db.count_receipts("m3").unwrap(), 0);
    }

    #[test]
    fn mark_read_bound_is_inclusive() {
        let db = seed();
        db.insert_message("m1", "dm-ab", "alice", "TEXT", "a", &ts(1)).unwrap();
        db.insert_message("m2", "dm-ab", "alice", "TEXT", "b", &ts(2)).unwrap();

        let marked = db.mark_read("dm-ab", "bob", None, Some("m1"), 200, &ts(3)).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(db.count_unread("dm-ab", "bob", "alice").unwrap(), 1);
    }

    #[test]
    fn direct_room_lookup() {
        let db = seed();
        assert_eq!(db.find_direct_room("bob", "alice").unwrap().as_deref(), Some("dm-ab"));
        assert_eq!(db.find_direct_room("alice", "carol").unwrap(), None);
        assert_eq!(
            db.direct_rooms_for_user("alice").unwrap(),
            vec![DirectRoomRow { room_id: "dm-ab".into(), peer_id: "bob".into() }]
        );
        assert!(db.is_member("dm-ab", "bob").unwrap());
        assert!(!db.is_member("dm-ab", "carol").unwrap());
    }

    #[test]
    fn stale_presence_is_expired() {
        let db = seed();
        db.set_presence("alice", true, &ts(-120_000)).unwrap();
        db.set_presence("bob", true, &ts(0)).unwrap();

        let cutoff = ts(-60_000);
        assert_eq!(db.expire_stale_presence(&cutoff).unwrap(), 1);
        let online: Vec<String> = db.list_online_users(&cutoff).unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(online, ["bob"]);
        assert!(!db.get_user_by_id("alice").unwrap().unwrap().is_online);
    }
}
