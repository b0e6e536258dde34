//! Collects the text stored over a trailing time window, either per
//! conversation or across everything.

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

use crate::storage::MessageStore;

pub const ALL_CHATS_LABEL: &str = "All chats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusScope {
    All,
    Conversation(i64),
}

/// Concatenated text of one scope over a window
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    pub scope: CorpusScope,
    pub label: String,
    pub text: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Gather one corpus per target over `[now - window, now)`, or a single
/// all-chats corpus when no targets are given. Empty corpora are dropped
/// and a failing target is logged and skipped. A window reaching past the
/// earliest representable time starts there.
pub fn collect_window(
    store: &MessageStore,
    targets: &[i64],
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<Corpus> {
    let start = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    if targets.is_empty() {
        return match store.text_window(None, start, now) {
            Ok(text) if !text.trim().is_empty() => vec![Corpus {
                scope: CorpusScope::All,
                label: ALL_CHATS_LABEL.to_string(),
                text,
                start,
                end: now,
            }],
            Ok(_) => {
                info!("No messages stored between {} and {}", start, now);
                Vec::new()
            }
            Err(e) => {
                error!("Failed to collect messages for all chats: {}", e);
                Vec::new()
            }
        };
    }

    let mut corpora = Vec::with_capacity(targets.len());
    for &chat_id in targets {
        let text = match store.text_window(Some(chat_id), start, now) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to collect messages for chat {}: {}", chat_id, e);
                continue;
            }
        };
        if text.trim().is_empty() {
            info!("No messages in chat {} for this window", chat_id);
            continue;
        }

        let label = match store.latest_title(chat_id) {
            Ok(title) => title,
            Err(e) => {
                error!("Failed to look up title for chat {}: {}", chat_id, e);
                chat_id.to_string()
            }
        };

        corpora.push(Corpus {
            scope: CorpusScope::Conversation(chat_id),
            label,
            text,
            start,
            end: now,
        });
    }
    corpora
}
