//! Record types persisted in and read back from the `messages` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media tag stored for attachments the platform could not render.
pub const UNSUPPORTED_MEDIA: &str = "MessageMediaUnsupported";

/// Conversation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }

    /// Parse a type tag, ignoring case. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            "supergroup" => Some(ChatKind::Supergroup),
            "channel" => Some(ChatKind::Channel),
            _ => None,
        }
    }
}

/// Attachment classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Image,
    Document { file_name: Option<String> },
    /// Media the platform marks as unrenderable
    Unsupported,
    /// Any other media class, kept under the connector's class name
    Other(String),
}

impl MediaKind {
    /// The tag written to the `media_type` column
    pub fn tag(&self) -> String {
        match self {
            MediaKind::Photo => "Photo".to_string(),
            MediaKind::Video => "Video".to_string(),
            MediaKind::Audio => "Audio".to_string(),
            MediaKind::Image => "Image".to_string(),
            MediaKind::Document { file_name: None } => "Document".to_string(),
            MediaKind::Document {
                file_name: Some(name),
            } => format!("Document: {}", name),
            MediaKind::Unsupported => UNSUPPORTED_MEDIA.to_string(),
            MediaKind::Other(class) => class.clone(),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Photo" => MediaKind::Photo,
            "Video" => MediaKind::Video,
            "Audio" => MediaKind::Audio,
            "Image" => MediaKind::Image,
            "Document" => MediaKind::Document { file_name: None },
            UNSUPPORTED_MEDIA => MediaKind::Unsupported,
            other => match other.strip_prefix("Document: ") {
                Some(name) => MediaKind::Document {
                    file_name: Some(name.to_string()),
                },
                None => MediaKind::Other(other.to_string()),
            },
        }
    }
}

impl From<MediaKind> for String {
    fn from(kind: MediaKind) -> Self {
        kind.tag()
    }
}

impl From<String> for MediaKind {
    fn from(tag: String) -> Self {
        MediaKind::from_tag(&tag)
    }
}

/// A normalized message, ready to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Platform message id, unique only within `chat_id`
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_title: String,
    pub chat_type: ChatKind,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub sender_first_name: Option<String>,
    pub sender_last_name: Option<String>,
    pub text: String,
    /// When the platform says the message was sent
    pub date: DateTime<Utc>,
    pub media_type: Option<MediaKind>,
    pub is_forwarded: bool,
    pub forward_from: Option<String>,
    pub reply_to_msg_id: Option<i64>,
    /// Set on revision records produced by an edit event
    pub is_edited: bool,
}

/// Lightweight view of the message a stored message replies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyRef {
    pub sender: String,
    pub text: String,
}

/// A message as read back from the store
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(flatten)]
    pub record: MessageRecord,
    /// When this row was written locally
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_content: Option<ReplyRef>,
}

/// Filter and paging parameters for [`MessageStore::query`](super::MessageStore::query)
#[derive(Debug, Clone, Deserialize)]
pub struct MessageQuery {
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            chat_id: None,
            sender_id: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl MessageQuery {
    /// Last `limit` messages of one conversation
    pub fn chat(chat_id: i64, limit: u32) -> Self {
        Self {
            chat_id: Some(chat_id),
            limit,
            ..Self::default()
        }
    }
}

/// Conversation id with its most recent title
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
}
