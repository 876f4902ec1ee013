//! Client/server wire protocol (§6.1) and the internal broker payloads that
//! carry the same shapes across `chat.ingress`, `read.receipts`,
//! `typing.events`, and `push.shared`.
//!
//! Dynamic JSON frames are modeled as `#[serde(tag = "type")]` sum types
//! (§9 Design Notes) rather than a typed-extraction-from-map-of-any
//! pattern. An unrecognized `type` tag on the client→server side
//! deserializes into [`ClientFrame::Unknown`] instead of failing parse, so
//! "frames other than the documented ones MUST be ignored" falls out of
//! the normal dispatch `match` rather than a fragile catch-all.

use serde::{Deserialize, Serialize};

/// A frame received from a client over the WebSocket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    SendMessage {
        #[serde(rename = "chatId")]
        chat_id: i64,
        body: String,
        uuid: String,
    },
    Typing {
        #[serde(rename = "chatId")]
        chat_id: i64,
    },
    Read {
        #[serde(rename = "chatId")]
        chat_id: i64,
        #[serde(rename = "msgId")]
        msg_id: i64,
    },
    Ping,
    /// Catch-all for any other recognized-JSON-but-unrecognized-`type`
    /// frame. Dispatch ignores it; it exists so parsing never fails on a
    /// forward-compatible client sending a newer frame kind.
    #[serde(other)]
    Unknown,
}

/// A frame sent to a client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    Message {
        id: i64,
        #[serde(rename = "chatId")]
        chat_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
        body: String,
        #[serde(rename = "createdAt")]
        created_at: chrono::DateTime<chrono::Utc>,
    },
    Typing {
        #[serde(rename = "chatId")]
        chat_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
    },
    Read {
        #[serde(rename = "chatId")]
        chat_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
        #[serde(rename = "msgId")]
        msg_id: i64,
    },
    Presence {
        #[serde(rename = "userId")]
        user_id: i64,
        online: bool,
        #[serde(rename = "lastSeen")]
        last_seen: i64,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Payload published to `chat.ingress` by the Gateway and consumed by the
/// Chat worker (§4.2, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressMessage {
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub body: String,
    #[serde(rename = "clientUuid")]
    pub client_uuid: String,
    pub ts: chrono::DateTime<chrono::Utc>,
}

/// Payload published to `typing.events` by the Gateway and rebroadcast by
/// the Presence worker (§4.2, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEvent {
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
}

/// Payload published to `read.receipts` by the Gateway and batched by the
/// Presence worker (§4.2, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadEvent {
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "msgId")]
    pub msg_id: i64,
}

/// Payload published to `push.shared` by the Chat worker and consumed by
/// the Push worker (§4.3, §4.5). Carries everything the push path needs
/// without a repository round trip back to the messages table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCandidate {
    pub id: i64,
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "userId")]
    pub sender_id: i64,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_frame_roundtrips() {
        let json = r#"{"type":"SendMessage","chatId":7,"body":"hi","uuid":"u1"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                chat_id: 7,
                body: "hi".into(),
                uuid: "u1".into(),
            }
        );
    }

    #[test]
    fn ping_frame_has_no_fields() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"Ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn unrecognized_type_tag_is_ignored_not_rejected() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"FutureFrame","x":1}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn server_error_frame_serializes_with_tag() {
        let frame = ServerFrame::error("NOT_MEMBER", "not a member of this chat");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"Error""#));
        assert!(json.contains("NOT_MEMBER"));
    }

    #[test]
    fn message_frame_uses_camelcase_field_names() {
        let frame = ServerFrame::Message {
            id: 1,
            chat_id: 7,
            user_id: 2,
            body: "hi".into(),
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""chatId":7"#));
        assert!(json.contains(r#""userId":2"#));
    }
}
