use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_online   INTEGER NOT NULL DEFAULT 0,
                last_seen   TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_online ON users(is_online, last_seen);

            -- Direct rooms have no name; NULLs never collide on UNIQUE
            CREATE TABLE rooms (
                id          TEXT PRIMARY KEY,
                name        TEXT UNIQUE,
                is_private  INTEGER NOT NULL DEFAULT 0,
                is_direct   INTEGER NOT NULL DEFAULT 0,
                creator_id  TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE room_members (
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                UNIQUE(user_id, room_id)
            );

            CREATE INDEX idx_room_members_room ON room_members(room_id);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                room_id     TEXT NOT NULL REFERENCES rooms(id),
                sender_id   TEXT NOT NULL REFERENCES users(id),
                type        TEXT NOT NULL DEFAULT 'TEXT',
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, created_at, id);

            CREATE TABLE message_reads (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                read_at     TEXT NOT NULL,
                UNIQUE(message_id, user_id)
            );

            CREATE INDEX idx_message_reads_user ON message_reads(user_id, message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
