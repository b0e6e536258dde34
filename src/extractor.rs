//! Normalization of raw bridge messages into storable records, and the
//! exclusion filter applied before anything is written.

use std::collections::HashSet;

use crate::bridge::{RawChat, RawMedia, RawMessage, RawSender};
use crate::storage::{ChatKind, MediaKind, MessageRecord};

/// Body stored for unsupported media that came without any text
pub const UNSUPPORTED_PLACEHOLDER: &str = "[unsupported media]";

/// Conversation and sender ids whose messages are never recorded
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub chat_ids: HashSet<i64>,
    pub sender_ids: HashSet<i64>,
}

impl Filters {
    pub fn new(
        chat_ids: impl IntoIterator<Item = i64>,
        sender_ids: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            chat_ids: chat_ids.into_iter().collect(),
            sender_ids: sender_ids.into_iter().collect(),
        }
    }
}

/// Whether a record passes the exclusion lists
pub fn should_accept(record: &MessageRecord, filters: &Filters) -> bool {
    if filters.chat_ids.contains(&record.chat_id) {
        return false;
    }
    match record.sender_id {
        Some(sender_id) => !filters.sender_ids.contains(&sender_id),
        None => true,
    }
}

/// Turn a raw message into a record. Missing fields fall back to defaults;
/// this never fails.
pub fn normalize(raw: &RawMessage, edited: bool) -> MessageRecord {
    let media_type = raw.media.as_ref().and_then(classify_media);

    let mut text = raw.text.clone().unwrap_or_default();
    if text.is_empty() && media_type == Some(MediaKind::Unsupported) {
        text = UNSUPPORTED_PLACEHOLDER.to_string();
    }

    let chat = raw.chat.as_ref();
    let sender = raw.sender.as_ref();

    let (forward_from, is_forwarded) = match &raw.forward {
        Some(forward) => (
            Some(
                forward
                    .sender
                    .as_ref()
                    .map(forward_label)
                    .unwrap_or_else(|| "Unknown".to_string()),
            ),
            true,
        ),
        None => (None, false),
    };

    MessageRecord {
        message_id: raw.id,
        chat_id: raw.chat_id,
        chat_title: chat_title(raw.chat_id, chat),
        chat_type: chat.map(chat_kind).unwrap_or_default(),
        sender_id: raw.sender_id.or(sender.and_then(|s| s.id)),
        sender_username: sender.and_then(|s| non_empty(&s.username)),
        sender_first_name: sender.and_then(|s| non_empty(&s.first_name)),
        sender_last_name: sender.and_then(|s| non_empty(&s.last_name)),
        text,
        date: raw.date,
        media_type,
        is_forwarded,
        forward_from,
        reply_to_msg_id: raw.reply_to_msg_id,
        is_edited: edited,
    }
}

/// Explicit type tag first, then the platform flags, then private
fn chat_kind(chat: &RawChat) -> ChatKind {
    if let Some(kind) = chat.kind.as_deref().and_then(ChatKind::parse) {
        return kind;
    }
    if chat.megagroup || chat.gigagroup {
        ChatKind::Supergroup
    } else if chat.broadcast {
        ChatKind::Channel
    } else if chat.is_group {
        ChatKind::Group
    } else {
        ChatKind::Private
    }
}

fn chat_title(chat_id: i64, chat: Option<&RawChat>) -> String {
    let Some(chat) = chat else {
        return format!("Chat {}", chat_id);
    };

    if let Some(title) = non_empty(&chat.title) {
        return title;
    }

    match (non_empty(&chat.first_name), non_empty(&chat.last_name)) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first,
        (None, Some(last)) => last,
        (None, None) => format!("Chat {}", chat_id),
    }
}

/// Map a media attachment to its kind using the class tag and MIME hint.
/// `None` when the handle carries nothing to classify.
fn classify_media(media: &RawMedia) -> Option<MediaKind> {
    let class = non_empty(&media.class);
    if class.as_deref() == Some(crate::storage::UNSUPPORTED_MEDIA) {
        return Some(MediaKind::Unsupported);
    }
    if media.photo {
        return Some(MediaKind::Photo);
    }

    let Some(document) = &media.document else {
        return class.map(MediaKind::Other);
    };

    let mime = document
        .mime_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let kind = if mime.contains("video") {
        MediaKind::Video
    } else if mime.contains("audio") || mime.contains("voice") {
        MediaKind::Audio
    } else if mime.contains("image") {
        MediaKind::Image
    } else {
        MediaKind::Document {
            file_name: non_empty(&document.file_name),
        }
    };
    Some(kind)
}

fn forward_label(sender: &RawSender) -> String {
    non_empty(&sender.username)
        .or_else(|| non_empty(&sender.first_name))
        .or_else(|| sender.id.map(|id| id.to_string()))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{RawDocument, RawForward};
    use crate::bridge::BridgeEvent;
    use chrono::{TimeZone, Utc};

    fn bare(chat_id: i64) -> RawMessage {
        RawMessage {
            id: 1,
            chat_id,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ..RawMessage::default()
        }
    }

    fn document(mime: &str, file_name: Option<&str>) -> RawMedia {
        RawMedia {
            class: Some("MessageMediaDocument".to_string()),
            photo: false,
            document: Some(RawDocument {
                mime_type: Some(mime.to_string()),
                file_name: file_name.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let record = normalize(&bare(55), false);

        assert_eq!(record.text, "");
        assert_eq!(record.chat_type, ChatKind::Private);
        assert_eq!(record.chat_title, "Chat 55");
        assert_eq!(record.sender_id, None);
        assert_eq!(record.sender_username, None);
        assert_eq!(record.media_type, None);
        assert!(!record.is_forwarded);
        assert_eq!(record.forward_from, None);
        assert_eq!(record.reply_to_msg_id, None);
        assert!(!record.is_edited);
    }

    #[test]
    fn test_chat_kind_precedence() {
        let mut chat = RawChat {
            id: Some(1),
            kind: Some("group".to_string()),
            megagroup: true,
            broadcast: true,
            ..RawChat::default()
        };
        assert_eq!(chat_kind(&chat), ChatKind::Group);

        chat.kind = Some("unknown-kind".to_string());
        assert_eq!(chat_kind(&chat), ChatKind::Supergroup);

        chat.megagroup = false;
        chat.gigagroup = true;
        assert_eq!(chat_kind(&chat), ChatKind::Supergroup);

        chat.gigagroup = false;
        assert_eq!(chat_kind(&chat), ChatKind::Channel);

        chat.broadcast = false;
        chat.is_group = true;
        assert_eq!(chat_kind(&chat), ChatKind::Group);

        chat.is_group = false;
        assert_eq!(chat_kind(&chat), ChatKind::Private);
    }

    #[test]
    fn test_chat_title_fallbacks() {
        let named = RawChat {
            id: Some(1),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            ..RawChat::default()
        };
        assert_eq!(chat_title(1, Some(&named)), "Ada Lovelace");

        let empty_title = RawChat {
            id: Some(2),
            title: Some(String::new()),
            ..RawChat::default()
        };
        assert_eq!(chat_title(2, Some(&empty_title)), "Chat 2");
    }

    #[test]
    fn test_media_classification() {
        assert_eq!(classify_media(&document("video/mp4", None)), Some(MediaKind::Video));
        assert_eq!(classify_media(&document("audio/ogg", None)), Some(MediaKind::Audio));
        assert_eq!(
            classify_media(&document("application/x-voice", None)),
            Some(MediaKind::Audio)
        );
        assert_eq!(classify_media(&document("image/webp", None)), Some(MediaKind::Image));
        assert_eq!(
            classify_media(&document("application/pdf", Some("invoice.pdf"))),
            Some(MediaKind::Document {
                file_name: Some("invoice.pdf".to_string())
            })
        );
        assert_eq!(
            classify_media(&RawMedia {
                class: Some("MessageMediaPhoto".to_string()),
                photo: true,
                document: None,
            }),
            Some(MediaKind::Photo)
        );
        assert_eq!(
            classify_media(&RawMedia {
                class: Some("MessageMediaGeo".to_string()),
                ..RawMedia::default()
            }),
            Some(MediaKind::Other("MessageMediaGeo".to_string()))
        );
        assert_eq!(classify_media(&RawMedia::default()), None);
        assert_eq!(
            classify_media(&RawMedia {
                class: None,
                document: Some(RawDocument::default()),
                ..RawMedia::default()
            }),
            Some(MediaKind::Document { file_name: None })
        );
    }

    #[test]
    fn test_unsupported_media_without_text_gets_placeholder() {
        let mut raw = bare(1);
        raw.media = Some(RawMedia {
            class: Some("MessageMediaUnsupported".to_string()),
            ..RawMedia::default()
        });
        let record = normalize(&raw, false);
        assert_eq!(record.media_type, Some(MediaKind::Unsupported));
        assert_eq!(record.text, UNSUPPORTED_PLACEHOLDER);

        raw.text = Some("look".to_string());
        assert_eq!(normalize(&raw, false).text, "look");
    }

    #[test]
    fn test_forward_labels() {
        let mut raw = bare(1);
        raw.forward = Some(RawForward { sender: None });
        let record = normalize(&raw, false);
        assert!(record.is_forwarded);
        assert_eq!(record.forward_from.as_deref(), Some("Unknown"));

        raw.forward = Some(RawForward {
            sender: Some(RawSender {
                id: Some(31),
                username: Some(String::new()),
                first_name: None,
                last_name: None,
            }),
        });
        assert_eq!(normalize(&raw, false).forward_from.as_deref(), Some("31"));
    }

    #[test]
    fn test_full_message_and_edit_flag() {
        let mut raw = bare(100);
        raw.text = Some("hello".to_string());
        raw.sender_id = Some(7);
        raw.sender = Some(RawSender {
            id: Some(7),
            username: Some("ferris".to_string()),
            first_name: Some("Ferris".to_string()),
            last_name: None,
        });
        raw.chat = Some(RawChat {
            id: Some(100),
            title: Some("Crabs".to_string()),
            is_group: true,
            ..RawChat::default()
        });
        raw.reply_to_msg_id = Some(4);

        let record = normalize(&raw, true);
        assert_eq!(record.chat_title, "Crabs");
        assert_eq!(record.chat_type, ChatKind::Group);
        assert_eq!(record.sender_username.as_deref(), Some("ferris"));
        assert_eq!(record.reply_to_msg_id, Some(4));
        assert!(record.is_edited);
    }

    #[test]
    fn test_sender_id_taken_from_sender_handle() {
        let mut raw = bare(1);
        raw.sender = Some(RawSender {
            id: Some(12),
            ..RawSender::default()
        });
        assert_eq!(normalize(&raw, false).sender_id, Some(12));
    }

    #[test]
    fn test_partial_handles_still_normalize() {
        let json = r#"{
            "type": "new_message",
            "id": 8,
            "chat_id": -100,
            "date": "2024-05-01T12:00:00Z",
            "text": "hi",
            "chat": {"megagroup": true},
            "sender": {"username": "x"},
            "media": {"photo": true},
            "forward": {"sender": {"last_name": "Only"}}
        }"#;
        let BridgeEvent::NewMessage(raw) = serde_json::from_str::<BridgeEvent>(json).unwrap() else {
            panic!("expected a new message");
        };

        let record = normalize(&raw, false);
        assert_eq!(record.chat_type, ChatKind::Supergroup);
        assert_eq!(record.chat_title, "Chat -100");
        assert_eq!(record.sender_id, None);
        assert_eq!(record.sender_username.as_deref(), Some("x"));
        assert_eq!(record.media_type, Some(MediaKind::Photo));
        assert_eq!(record.forward_from.as_deref(), Some("Unknown"));
        assert_eq!(record.text, "hi");

        let json = r#"{
            "type": "message_edited",
            "id": 9,
            "chat_id": 5,
            "date": "2024-05-01T12:00:00Z",
            "media": {"document": {"mime_type": "audio/ogg"}}
        }"#;
        let BridgeEvent::MessageEdited(raw) = serde_json::from_str::<BridgeEvent>(json).unwrap() else {
            panic!("expected an edit");
        };
        let record = normalize(&raw, true);
        assert_eq!(record.media_type, Some(MediaKind::Audio));
        assert!(record.is_edited);
    }

    #[test]
    fn test_filters_reject_excluded_ids() {
        let filters = Filters::new([100], [7]);

        let mut raw = bare(100);
        assert!(!should_accept(&normalize(&raw, false), &filters));

        raw.chat_id = 200;
        raw.sender_id = Some(7);
        assert!(!should_accept(&normalize(&raw, false), &filters));

        raw.sender_id = Some(8);
        assert!(should_accept(&normalize(&raw, false), &filters));

        raw.sender_id = None;
        assert!(should_accept(&normalize(&raw, false), &filters));
    }
}
