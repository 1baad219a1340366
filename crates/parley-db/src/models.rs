//! Database row types. These map directly to SQLite rows and stay
//! independent of the wire types in parley-types.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub public_key: String,
}

/// A user plus the number of unread messages they have sent to the viewer.
pub struct UserSummaryRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub public_key: String,
    pub unread_count: i64,
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub ciphertext: String,
    pub iv_nonce: String,
    pub encrypted_key_for_sender: String,
    pub encrypted_key_for_recipient: String,
    pub is_read: bool,
    pub created_at: String,
}
