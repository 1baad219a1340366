use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            public_key      TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id                   INTEGER NOT NULL REFERENCES users(id),
            recipient_id                INTEGER NOT NULL REFERENCES users(id),
            ciphertext                  TEXT NOT NULL,
            iv_nonce                    TEXT NOT NULL,
            encrypted_key_for_sender    TEXT NOT NULL,
            encrypted_key_for_recipient TEXT NOT NULL,
            is_read                     INTEGER NOT NULL DEFAULT 0,
            created_at                  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, recipient_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(recipient_id, sender_id) WHERE is_read = 0;
        ",
    )?;

    debug!("Database migrations complete");
    Ok(())
}
