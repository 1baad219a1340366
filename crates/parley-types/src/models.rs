use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{ChatFrame, ChatPayload};

/// A verified user as seen by the gateway. Immutable for the lifetime of a
/// connection; key rotation is announced separately with `IdentityChange`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: i64,
    pub public_key: String,
}

/// A chat message before the store has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub ciphertext: String,
    pub iv_nonce: String,
    pub encrypted_key_for_sender: String,
    pub encrypted_key_for_recipient: String,
}

impl NewMessage {
    pub fn from_frame(sender_id: i64, frame: ChatFrame) -> Self {
        Self {
            sender_id,
            recipient_id: frame.recipient_id,
            ciphertext: frame.ciphertext,
            iv_nonce: frame.iv_nonce,
            encrypted_key_for_sender: frame.encrypted_key_for_sender,
            encrypted_key_for_recipient: frame.encrypted_key_for_recipient,
        }
    }
}

/// What the store hands back after a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedMessage {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

/// A stored message. Carries both wrapped content keys; which one a client
/// gets depends on whether it is the sender or the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub ciphertext: String,
    pub iv_nonce: String,
    pub encrypted_key_for_sender: String,
    pub encrypted_key_for_recipient: String,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn from_persisted(new: NewMessage, persisted: PersistedMessage) -> Self {
        Self {
            id: persisted.id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            ciphertext: new.ciphertext,
            iv_nonce: new.iv_nonce,
            encrypted_key_for_sender: new.encrypted_key_for_sender,
            encrypted_key_for_recipient: new.encrypted_key_for_recipient,
            is_read: false,
            timestamp: persisted.timestamp,
        }
    }

    /// The wrapped content key `viewer_id` can open. The sender's copy wins
    /// for notes to self.
    pub fn encrypted_key_for(&self, viewer_id: i64) -> &str {
        if viewer_id == self.sender_id {
            &self.encrypted_key_for_sender
        } else {
            &self.encrypted_key_for_recipient
        }
    }

    /// Builds the outbound chat payload for one participant.
    pub fn payload_for(&self, viewer_id: i64) -> ChatPayload {
        ChatPayload {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            ciphertext: self.ciphertext.clone(),
            encrypted_key: self.encrypted_key_for(viewer_id).to_string(),
            iv_nonce: self.iv_nonce.clone(),
            timestamp: self.timestamp,
        }
    }
}
