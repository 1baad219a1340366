use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Online/offline flag carried by `StatusChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// One participant's view of a stored message. `encrypted_key` is the copy
/// of the content key wrapped for whoever receives this payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub ciphertext: String,
    pub encrypted_key: String,
    pub iv_nonce: String,
    pub timestamp: DateTime<Utc>,
}

/// Events sent from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once to a client right after it is admitted
    InitialState { online_user_ids: BTreeSet<i64> },

    /// A user came online or went offline
    StatusChange { user_id: i64, status: PresenceStatus },

    /// The peer is typing in a conversation with the receiver
    Typing { sender_id: i64 },

    /// The peer has read the receiver's messages
    ReadReceipt { sender_id: i64 },

    /// A user rotated their public key
    IdentityChange { user_id: i64, new_public_key: String },

    /// A relayed chat message (sender echo or recipient copy)
    Message(ChatPayload),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::StatusChange { .. } => "status_change",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::IdentityChange { .. } => "identity_change",
            Self::Message(_) => "message",
        }
    }
}

/// Inbound chat message. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub recipient_id: i64,
    pub ciphertext: String,
    pub iv_nonce: String,
    pub encrypted_key_for_sender: String,
    pub encrypted_key_for_recipient: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingFrame {
    recipient_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadFrame {
    sender_id: i64,
}

/// Frames sent FROM client TO server over the gateway socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Chat(ChatFrame),
    Typing { recipient_id: i64 },
    MarkRead { sender_id: i64 },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame must be a JSON object")]
    NotAnObject,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} frame: {source}")]
    InvalidFields {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
}

impl ClientFrame {
    /// Classifies a text frame. Chat frames may omit `type` entirely;
    /// control frames are tagged `typing` or `mark_read`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }

        let kind = match value.get("type") {
            None | Some(Value::Null) => "message",
            Some(Value::String(s)) => match s.as_str() {
                "message" => "message",
                "typing" => "typing",
                "mark_read" => "mark_read",
                other => return Err(FrameError::UnknownType(other.to_string())),
            },
            Some(other) => return Err(FrameError::UnknownType(other.to_string())),
        };

        let invalid = |source| FrameError::InvalidFields { kind, source };
        match kind {
            "typing" => {
                let frame: TypingFrame = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::Typing { recipient_id: frame.recipient_id })
            }
            "mark_read" => {
                let frame: MarkReadFrame = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::MarkRead { sender_id: frame.sender_id })
            }
            _ => {
                let frame: ChatFrame = serde_json::from_value(value).map_err(invalid)?;
                frame.validate()?;
                Ok(Self::Chat(frame))
            }
        }
    }
}

impl ChatFrame {
    fn validate(&self) -> Result<(), FrameError> {
        let fields = [
            ("ciphertext", &self.ciphertext),
            ("ivNonce", &self.iv_nonce),
            ("encryptedKeyForSender", &self.encrypted_key_for_sender),
            ("encryptedKeyForRecipient", &self.encrypted_key_for_recipient),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(FrameError::EmptyField(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untyped_frame_is_a_chat_message() {
        let text = json!({
            "recipientId": 2,
            "ciphertext": "c1",
            "ivNonce": "iv1",
            "encryptedKeyForSender": "k1s",
            "encryptedKeyForRecipient": "k1r",
        })
        .to_string();

        match ClientFrame::parse(&text).unwrap() {
            ClientFrame::Chat(frame) => {
                assert_eq!(frame.recipient_id, 2);
                assert_eq!(frame.encrypted_key_for_recipient, "k1r");
            }
            other => panic!("expected chat frame, got {:?}", other),
        }
    }

    #[test]
    fn control_frames() {
        let typing = ClientFrame::parse(r#"{"type":"typing","recipientId":5}"#).unwrap();
        assert_eq!(typing, ClientFrame::Typing { recipient_id: 5 });

        let read = ClientFrame::parse(r#"{"type":"mark_read","senderId":9}"#).unwrap();
        assert_eq!(read, ClientFrame::MarkRead { sender_id: 9 });
    }

    #[test]
    fn malformed_frames_are_rejected() {
        // missing encryptedKeyForRecipient
        let missing = r#"{"recipientId":2,"ciphertext":"c","ivNonce":"i","encryptedKeyForSender":"k"}"#;
        assert!(matches!(
            ClientFrame::parse(missing),
            Err(FrameError::InvalidFields { kind: "message", .. })
        ));

        let non_integer = r#"{"recipientId":"two","ciphertext":"c","ivNonce":"i","encryptedKeyForSender":"k","encryptedKeyForRecipient":"k"}"#;
        assert!(ClientFrame::parse(non_integer).is_err());

        let empty = r#"{"recipientId":2,"ciphertext":"","ivNonce":"i","encryptedKeyForSender":"k","encryptedKeyForRecipient":"k"}"#;
        assert!(matches!(ClientFrame::parse(empty), Err(FrameError::EmptyField("ciphertext"))));

        assert!(matches!(ClientFrame::parse("not json"), Err(FrameError::InvalidJson(_))));
        assert!(matches!(ClientFrame::parse("[1,2]"), Err(FrameError::NotAnObject)));
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"voice"}"#),
            Err(FrameError::UnknownType(_))
        ));
    }

    #[test]
    fn outbound_wire_shapes() {
        let initial = ServerEvent::InitialState { online_user_ids: BTreeSet::from([2, 1]) };
        assert_eq!(
            serde_json::to_value(&initial).unwrap(),
            json!({"type": "initial_state", "onlineUserIds": [1, 2]})
        );

        let status = ServerEvent::StatusChange { user_id: 3, status: PresenceStatus::Offline };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status_change", "userId": 3, "status": "offline"})
        );

        let identity = ServerEvent::IdentityChange { user_id: 4, new_public_key: "pk".into() };
        assert_eq!(
            serde_json::to_value(&identity).unwrap(),
            json!({"type": "identity_change", "userId": 4, "newPublicKey": "pk"})
        );

        let ts = "2026-01-02T03:04:05Z".parse().unwrap();
        let msg = ServerEvent::Message(ChatPayload {
            id: 1,
            sender_id: 1,
            recipient_id: 2,
            ciphertext: "c1".into(),
            encrypted_key: "k1r".into(),
            iv_nonce: "iv1".into(),
            timestamp: ts,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["senderId"], 1);
        assert_eq!(value["encryptedKey"], "k1r");
        assert_eq!(value["ivNonce"], "iv1");
        assert_eq!(msg.kind(), "message");
    }
}
