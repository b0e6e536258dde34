//! JSON protocol types for communication between the archiver and tg-bridge.
//!
//! The bridge sends JSON-line events to stdout, and receives commands via stdin.
//! Every field the platform may omit is optional here; the extractor decides
//! what the defaults are.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events sent from the bridge (via stdout)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Logged in and receiving updates
    Connected {
        user_id: i64,
        username: Option<String>,
    },

    /// A new message arrived
    NewMessage(RawMessage),

    /// An existing message was edited
    MessageEdited(RawMessage),

    /// Error occurred on the platform side
    Error { code: String, message: String },

    /// Informational log message
    Log { level: String, message: String },

    /// Session logged out, interactive login is needed again
    LoggedOut { reason: String },
}

/// A platform message as the bridge reports it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    /// Platform message id, unique within the conversation
    pub id: i64,

    /// Conversation (peer) id
    pub chat_id: i64,

    /// When the message was sent
    pub date: DateTime<Utc>,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub sender_id: Option<i64>,

    /// Conversation metadata, when the bridge could resolve it
    #[serde(default)]
    pub chat: Option<RawChat>,

    /// Sender metadata, when the bridge could resolve it
    #[serde(default)]
    pub sender: Option<RawSender>,

    #[serde(default)]
    pub media: Option<RawMedia>,

    #[serde(default)]
    pub forward: Option<RawForward>,

    #[serde(default)]
    pub reply_to_msg_id: Option<i64>,
}

/// Conversation metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChat {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Explicit conversation type tag, if the platform sent one
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub megagroup: bool,
    #[serde(default)]
    pub gigagroup: bool,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub is_group: bool,
}

/// Sender (or forward origin) metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSender {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Attached media
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMedia {
    /// Platform media class name, e.g. `MessageMediaDocument`
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub photo: bool,
    #[serde(default)]
    pub document: Option<RawDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Forward origin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawForward {
    #[serde(default)]
    pub sender: Option<RawSender>,
}

/// Commands sent to the bridge (via stdin)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Disconnect and exit
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_new_message() {
        let json = r#"{"type": "new_message", "id": 5, "chat_id": 100, "date": "2024-05-01T12:00:00+00:00"}"#;
        let event: BridgeEvent = serde_json::from_str(json).unwrap();
        match event {
            BridgeEvent::NewMessage(msg) => {
                assert_eq!(msg.id, 5);
                assert_eq!(msg.chat_id, 100);
                assert!(msg.text.is_none());
                assert!(msg.chat.is_none());
                assert!(msg.sender.is_none());
                assert!(msg.media.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_edit_event() {
        let json = r#"{
            "type": "message_edited",
            "id": 9,
            "chat_id": -100200,
            "date": "2024-05-01T12:00:00Z",
            "text": "fixed typo",
            "sender_id": 7,
            "chat": {"id": -100200, "title": "Rustaceans", "megagroup": true},
            "sender": {"id": 7, "username": "ferris"},
            "media": {"class": "MessageMediaDocument", "document": {"mime_type": "video/mp4"}},
            "forward": {"sender": {"id": 3, "first_name": "Bob"}},
            "reply_to_msg_id": 8
        }"#;
        let event: BridgeEvent = serde_json::from_str(json).unwrap();
        let BridgeEvent::MessageEdited(msg) = event else {
            panic!("expected an edit event");
        };
        assert_eq!(msg.sender.as_ref().and_then(|s| s.id), Some(7));
        let chat = msg.chat.unwrap();
        assert_eq!(chat.id, Some(-100200));
        assert!(chat.megagroup);
        assert_eq!(chat.title.as_deref(), Some("Rustaceans"));
        assert_eq!(msg.reply_to_msg_id, Some(8));
        assert_eq!(
            msg.media.unwrap().document.unwrap().mime_type.as_deref(),
            Some("video/mp4")
        );
    }

    #[test]
    fn test_parse_partial_handles() {
        let json = r#"{
            "type": "new_message",
            "id": 3,
            "chat_id": 100,
            "date": "2024-05-01T12:00:00Z",
            "chat": {"title": "No id"},
            "sender": {"username": "x"},
            "media": {"photo": true},
            "forward": {"sender": {}}
        }"#;
        let event: BridgeEvent = serde_json::from_str(json).unwrap();
        let BridgeEvent::NewMessage(msg) = event else {
            panic!("expected a new message");
        };
        assert_eq!(msg.chat.unwrap().id, None);
        assert_eq!(msg.sender.unwrap().id, None);
        let media = msg.media.unwrap();
        assert!(media.photo);
        assert_eq!(media.class, None);
        assert_eq!(msg.forward.unwrap().sender.unwrap().id, None);
    }

    #[test]
    fn test_serialize_disconnect() {
        let json = serde_json::to_string(&BridgeCommand::Disconnect).unwrap();
        assert_eq!(json, r#"{"type":"disconnect"}"#);
    }
}
