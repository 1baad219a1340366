use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use parley_types::models::{Message, NewMessage, PersistedMessage};

use crate::Database;
use crate::models::{MessageRow, UserRow, UserSummaryRow};

impl Database {
    // -- Users --

    /// Inserts a user and returns the assigned id.
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        public_key: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password_hash, public_key) VALUES (?1, ?2, ?3, ?4)",
                (username, email, password_hash, public_key),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// True when either the username or the email already belongs to someone.
    pub fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                    (username, email),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Every user except `viewer_id`, each with the count of unread messages
    /// they have sent to the viewer.
    pub fn list_users_except(&self, viewer_id: i64) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.public_key,
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.sender_id = u.id AND m.recipient_id = ?1 AND m.is_read = 0)
                 FROM users u
                 WHERE u.id != ?1
                 ORDER BY u.username",
            )?;

            let rows = stmt
                .query_map([viewer_id], |row| {
                    Ok(UserSummaryRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        public_key: row.get(3)?,
                        unread_count: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Replaces a user's public key. Returns false if the user does not exist.
    pub fn update_public_key(&self, user_id: i64, public_key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET public_key = ?1 WHERE id = ?2",
                (public_key, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Stores a message as unread and returns its server-assigned id and timestamp.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<PersistedMessage> {
        let timestamp = Utc::now();
        let created_at = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (sender_id, recipient_id, ciphertext, iv_nonce,
                     encrypted_key_for_sender, encrypted_key_for_recipient, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    msg.sender_id,
                    msg.recipient_id,
                    msg.ciphertext,
                    msg.iv_nonce,
                    msg.encrypted_key_for_sender,
                    msg.encrypted_key_for_recipient,
                    created_at,
                ],
            )?;
            Ok(PersistedMessage {
                id: conn.last_insert_rowid(),
                timestamp,
            })
        })
    }

    /// Both directions of the conversation between `user_a` and `user_b`,
    /// oldest first.
    pub fn get_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, ciphertext, iv_nonce,
                        encrypted_key_for_sender, encrypted_key_for_recipient, is_read, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;

            let rows = stmt
                .query_map([user_a, user_b], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })?;

        rows.into_iter().map(into_message).collect()
    }

    /// Flips every unread `sender_id -> recipient_id` message to read in one
    /// statement. Returns the number of rows changed.
    pub fn mark_read(&self, sender_id: i64, recipient_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE sender_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                [sender_id, recipient_id],
            )?;
            Ok(changed)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, filter: &str, param: P) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, email, password_hash, public_key FROM users WHERE {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                public_key: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        ciphertext: row.get(3)?,
        iv_nonce: row.get(4)?,
        encrypted_key_for_sender: row.get(5)?,
        encrypted_key_for_recipient: row.get(6)?,
        is_read: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn into_message(row: MessageRow) -> Result<Message> {
    let timestamp = DateTime::parse_from_rfc3339(&row.created_at)
        .with_context(|| format!("corrupt created_at '{}' on message {}", row.created_at, row.id))?
        .with_timezone(&Utc);

    Ok(Message {
        id: row.id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        ciphertext: row.ciphertext,
        iv_nonce: row.iv_nonce,
        encrypted_key_for_sender: row.encrypted_key_for_sender,
        encrypted_key_for_recipient: row.encrypted_key_for_recipient,
        is_read: row.is_read,
        timestamp,
    })
}
