//! Message formatting for terminal output.
//!
//! `MessageDisplay::format` is pure and returns the colored block as a string;
//! printing is left to the caller.

use chrono_tz::Tz;
use crossterm::execute;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor, Stylize};
use std::fmt::Write as _;
use std::io::stdout;

use crate::storage::{ChatKind, MediaKind, MessageRecord};

/// Color scheme for different message elements
pub struct ColorScheme {
    pub timestamp: Color,
    pub chat_title: Color,
    pub sender: Color,
    pub media_info: Color,
    pub forward_info: Color,
    pub reply_info: Color,
    pub edited: Color,
    pub separator: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            timestamp: Color::Green,
            chat_title: Color::Cyan,
            sender: Color::Yellow,
            media_info: Color::Red,
            forward_info: Color::Blue,
            reply_info: Color::Magenta,
            edited: Color::Red,
            separator: Color::DarkGrey,
        }
    }
}

/// Formats messages for the console
pub struct MessageDisplay {
    colors: ColorScheme,
    timezone: Tz,
}

impl MessageDisplay {
    pub fn new(timezone: Tz) -> Self {
        Self {
            colors: ColorScheme::default(),
            timezone,
        }
    }

    /// Render a record as a boxed, colored block of lines
    pub fn format(&self, msg: &MessageRecord) -> String {
        let mut out = String::new();

        if msg.is_edited {
            let _ = writeln!(out, "{}", "[edited]".with(self.colors.edited).bold());
        }

        let local = msg.date.with_timezone(&self.timezone);
        let header = format!(
            "{} {}",
            format!(" {} ", msg.chat_type.as_str().to_uppercase())
                .with(Color::Black)
                .on(chat_kind_color(msg.chat_type)),
            msg.chat_title.as_str().with(self.colors.chat_title),
        );
        let date = format!("[{}]", local.format("%Y-%m-%d %H:%M:%S")).with(self.colors.timestamp);
        let _ = writeln!(out, "┌─{}─{}", header, date);

        let _ = writeln!(
            out,
            "│ {}:",
            sender_name(msg).with(self.colors.sender)
        );

        let mut body = String::new();
        if let Some(media) = &msg.media_type {
            let label = match media {
                MediaKind::Unsupported => "[unsupported media type]".to_string(),
                other => format!("[{}]", other.tag()),
            };
            let _ = write!(body, "{} ", label.with(self.colors.media_info));
        }
        if msg.is_forwarded {
            let label = format!(
                "[forwarded from: {}]",
                msg.forward_from.as_deref().unwrap_or("Unknown")
            );
            let _ = write!(body, "{} ", label.with(self.colors.forward_info));
        }
        if let Some(reply_id) = msg.reply_to_msg_id {
            let label = format!("[reply to: {}]", reply_id);
            let _ = write!(body, "{} ", label.with(self.colors.reply_info));
        }
        body.push_str(&msg.text);
        let _ = writeln!(out, "│ {}", body);

        let ids = format!(
            "ChatID: {} | SenderID: {}",
            msg.chat_id,
            msg.sender_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "None".to_string())
        );
        let padding = 33usize.saturating_sub(ids.chars().count());
        let _ = write!(
            out,
            "└─[ {} ]{}",
            ids,
            "─".repeat(padding).with(self.colors.separator)
        );

        out
    }
}

fn chat_kind_color(kind: ChatKind) -> Color {
    match kind {
        ChatKind::Private => Color::Blue,
        ChatKind::Group => Color::Green,
        ChatKind::Supergroup => Color::Magenta,
        ChatKind::Channel => Color::Cyan,
    }
}

/// `@username`, else first and last name, else the sender id
pub fn sender_name(msg: &MessageRecord) -> String {
    if let Some(username) = msg.sender_username.as_deref().filter(|u| !u.is_empty()) {
        return format!("@{}", username);
    }

    let full = format!(
        "{} {}",
        msg.sender_first_name.as_deref().unwrap_or_default(),
        msg.sender_last_name.as_deref().unwrap_or_default()
    );
    let full = full.trim();
    if !full.is_empty() {
        return full.to_string();
    }

    match msg.sender_id {
        Some(id) => format!("ID:{}", id),
        None => "Unknown".to_string(),
    }
}

/// Print a connection status message
pub fn print_connected(user_id: i64, username: Option<&str>) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Green),
        SetAttribute(Attribute::Bold),
        Print("✓ Connected to Telegram"),
        SetAttribute(Attribute::Reset),
        ResetColor
    );
    println!();
    println!("  User ID: {}", user_id);
    if let Some(username) = username {
        println!("  Username: @{}", username);
    }
    println!();
    println!("Waiting for messages...");
    println!();
}

/// Print an error message
pub fn print_error(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Red),
        SetAttribute(Attribute::Bold),
        Print("✗ Error: "),
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Red),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print an info message
pub fn print_info(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        Print(message),
        ResetColor
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::record;

    #[test]
    fn test_sender_name_precedence() {
        let mut msg = record(1, 1, "hi");
        assert_eq!(sender_name(&msg), "@alice");

        msg.sender_username = None;
        msg.sender_last_name = Some("Smith".to_string());
        assert_eq!(sender_name(&msg), "Alice Smith");

        msg.sender_first_name = None;
        msg.sender_last_name = None;
        assert_eq!(sender_name(&msg), "ID:7");

        msg.sender_id = None;
        assert_eq!(sender_name(&msg), "Unknown");
    }

    #[test]
    fn test_format_includes_all_parts() {
        let mut msg = record(100, 1, "hello there");
        msg.media_type = Some(MediaKind::Photo);
        msg.is_forwarded = true;
        msg.forward_from = Some("bob".to_string());
        msg.reply_to_msg_id = Some(41);

        let display = MessageDisplay::new(chrono_tz::Asia::Shanghai);
        let text = display.format(&msg);

        // 12:00:01 UTC is 20:00:01 in Shanghai
        assert!(text.contains("[2024-05-01 20:00:01]"));
        assert!(text.contains("GROUP"));
        assert!(text.contains("Chat 100"));
        assert!(text.contains("@alice"));
        assert!(text.contains("[Photo]"));
        assert!(text.contains("[forwarded from: bob]"));
        assert!(text.contains("[reply to: 41]"));
        assert!(text.contains("hello there"));
        assert!(text.contains("ChatID: 100 | SenderID: 7"));
        assert!(!text.contains("[edited]"));
    }

    #[test]
    fn test_format_marks_edits() {
        let mut msg = record(1, 1, "v2");
        msg.is_edited = true;
        let text = MessageDisplay::new(chrono_tz::UTC).format(&msg);
        assert!(text.contains("[edited]"));
    }
}
