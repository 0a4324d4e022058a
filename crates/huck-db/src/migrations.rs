use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            color       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT ''
        );

        -- created_at is RFC 3339 with millisecond precision, so it sorts as text
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at, id);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            emoji_code  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji_code)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Seed the default channels
        INSERT OR IGNORE INTO channels (id, name, description)
            VALUES ('00000000-0000-0000-0000-000000000001', 'general', 'Everything start here');
        INSERT OR IGNORE INTO channels (id, name, description)
            VALUES ('00000000-0000-0000-0000-000000000002', 'random', '');
        INSERT OR IGNORE INTO channels (id, name, description)
            VALUES ('00000000-0000-0000-0000-000000000003', 'huckathon-dev', '');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
