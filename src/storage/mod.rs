//! SQLite storage for captured messages.

mod analytics;
mod migrate;
mod model;

pub use model::{
    ChatKind, ConversationSummary, MediaKind, MessageQuery, MessageRecord, ReplyRef,
    StoredMessage, UNSUPPORTED_MEDIA,
};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Storage timestamps are written in UTC with microseconds so that they
/// sort lexically in write order.
const STORED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const SELECT_COLUMNS: &str = "id, message_id, chat_id, chat_title, chat_type, sender_id, \
     sender_username, sender_first_name, sender_last_name, text, date, media_type, \
     is_forwarded, forward_from, reply_to_msg_id, created_at, is_edited";

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open message store at {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("failed to prepare store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema migration failed: {0}")]
    Migration(rusqlite::Error),

    #[error("failed to write message: {0}")]
    Write(rusqlite::Error),

    #[error("query failed: {0}")]
    Query(rusqlite::Error),

    #[error("message {0} not found")]
    NotFound(i64),

    #[error("message store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

struct StoreInner {
    conn: Connection,
    /// Last storage timestamp handed out, keeps them non-decreasing
    last_stored_at: Option<DateTime<Utc>>,
}

/// Thread-safe message store backed by SQLite
pub struct MessageStore {
    inner: Arc<Mutex<StoreInner>>,
    path: PathBuf,
}

impl MessageStore {
    /// Open (or create) the store at `path` and bring its schema up to date
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existed = path.exists();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // Enable WAL mode for better performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let store = Self::from_connection(conn, path.to_path_buf())?;

        if existed {
            info!("Connected to existing message store at {:?}", path);
        } else {
            info!("Message store initialized at {:?}", path);
        }

        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.lock()?
            .conn
            .execute_batch(sql)
            .map_err(StoreError::Query)
    }

    fn from_connection(mut conn: Connection, path: PathBuf) -> StoreResult<Self> {
        migrate::init_schema(&mut conn)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                conn,
                last_stored_at: None,
            })),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreInner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Persist a record, returning its row id
    pub fn save(&self, record: &MessageRecord) -> StoreResult<i64> {
        let mut inner = self.lock()?;

        let now = Utc::now();
        let stored_at = match inner.last_stored_at {
            Some(last) if last > now => last,
            _ => now,
        };

        inner
            .conn
            .execute(
                r#"
                INSERT INTO messages (
                    message_id, chat_id, chat_title, chat_type, sender_id,
                    sender_username, sender_first_name, sender_last_name, text,
                    date, media_type, is_forwarded, forward_from, reply_to_msg_id,
                    created_at, is_edited
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
                params![
                    record.message_id,
                    record.chat_id,
                    record.chat_title,
                    record.chat_type.as_str(),
                    record.sender_id,
                    record.sender_username,
                    record.sender_first_name,
                    record.sender_last_name,
                    record.text,
                    format_date(&record.date),
                    record.media_type.as_ref().map(MediaKind::tag),
                    record.is_forwarded,
                    record.forward_from,
                    record.reply_to_msg_id,
                    format_stored_at(&stored_at),
                    record.is_edited,
                ],
            )
            .map_err(StoreError::Write)?;

        inner.last_stored_at = Some(stored_at);
        let id = inner.conn.last_insert_rowid();
        debug!("Message saved, id: {}", id);

        Ok(id)
    }

    /// Fetch one stored message by row id
    pub fn get_by_id(&self, id: i64) -> StoreResult<StoredMessage> {
        let inner = self.lock()?;

        inner
            .conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::Query)?
            .ok_or(StoreError::NotFound(id))
    }

    /// The newest `limit` matching messages (after skipping `offset`),
    /// returned oldest first, with reply targets resolved where possible.
    pub fn query(&self, query: &MessageQuery) -> StoreResult<Vec<StoredMessage>> {
        let inner = self.lock()?;

        let mut conditions = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(chat_id) = query.chat_id {
            conditions.push("chat_id = ?");
            values.push(chat_id.into());
        }
        if let Some(sender_id) = query.sender_id {
            conditions.push("sender_id = ?");
            values.push(sender_id.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        values.push(i64::from(query.limit).into());
        values.push(i64::from(query.offset).into());

        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT {} FROM messages
                {}
                ORDER BY date DESC, id DESC
                LIMIT ? OFFSET ?
            )
            ORDER BY date ASC, id ASC
            "#,
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = inner.conn.prepare(&sql).map_err(StoreError::Query)?;
        let mut messages: Vec<StoredMessage> = stmt
            .query_map(params_from_iter(values), row_to_message)
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        resolve_replies(&inner.conn, &mut messages);

        Ok(messages)
    }

    /// Space-joined text of the messages stored in `[start, end)`,
    /// skipping empty bodies and unsupported media.
    ///
    /// `created_at` is compared as text. Every value has the fixed-width
    /// microsecond format once `open` has padded second-precision rows;
    /// those older rows carry no offset and are read as UTC.
    pub fn text_window(
        &self,
        chat_id: Option<i64>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<String> {
        let inner = self.lock()?;

        let mut sql = String::from(
            r#"
            SELECT text FROM messages
            WHERE created_at >= ?1
              AND created_at < ?2
              AND text IS NOT NULL
              AND text != ''
              AND (media_type IS NULL OR media_type != ?3)
            "#,
        );
        let mut values: Vec<Value> = vec![
            format_stored_at(&start).into(),
            format_stored_at(&end).into(),
            UNSUPPORTED_MEDIA.to_string().into(),
        ];

        if let Some(chat_id) = chat_id {
            sql.push_str(" AND chat_id = ?4");
            values.push(chat_id.into());
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut stmt = inner.conn.prepare(&sql).map_err(StoreError::Query)?;
        let texts: Vec<String> = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(texts.join(" "))
    }

    /// Latest known title of a conversation, or its id when none is stored
    pub fn latest_title(&self, chat_id: i64) -> StoreResult<String> {
        let inner = self.lock()?;

        let title: Option<Option<String>> = inner
            .conn
            .query_row(
                "SELECT chat_title FROM messages WHERE chat_id = ?1 ORDER BY date DESC, id DESC LIMIT 1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Query)?;

        Ok(title
            .flatten()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| chat_id.to_string()))
    }
}

impl Clone for MessageStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            path: self.path.clone(),
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

fn format_stored_at(at: &DateTime<Utc>) -> String {
    at.format(STORED_AT_FORMAT).to_string()
}

fn parse_date(value: Option<String>) -> DateTime<Utc> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_stored_at(value: Option<String>) -> DateTime<Utc> {
    value
        .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

/// Map a row selected with [`SELECT_COLUMNS`]. Rows written by older
/// versions may hold NULLs, which map to the record defaults.
fn row_to_message(row: &Row) -> rusqlite::Result<StoredMessage> {
    let chat_type: Option<String> = row.get(4)?;
    let media_type: Option<String> = row.get(11)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        record: MessageRecord {
            message_id: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
            chat_id: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
            chat_title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            chat_type: chat_type
                .as_deref()
                .and_then(ChatKind::parse)
                .unwrap_or_default(),
            sender_id: row.get(5)?,
            sender_username: row.get(6)?,
            sender_first_name: row.get(7)?,
            sender_last_name: row.get(8)?,
            text: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            date: parse_date(row.get(10)?),
            media_type: media_type
                .filter(|m| !m.is_empty())
                .map(|m| MediaKind::from_tag(&m)),
            is_forwarded: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
            forward_from: row.get(13)?,
            reply_to_msg_id: row.get(14)?,
            is_edited: row.get::<_, Option<bool>>(16)?.unwrap_or(false),
        },
        created_at: parse_stored_at(row.get(15)?),
        reply_content: None,
    })
}

/// Attach a [`ReplyRef`] to every message whose reply target is stored in
/// the same conversation. Unresolvable targets are left empty.
fn resolve_replies(conn: &Connection, messages: &mut [StoredMessage]) {
    if messages.iter().all(|m| m.record.reply_to_msg_id.is_none()) {
        return;
    }

    let mut stmt = match conn.prepare(
        r#"
        SELECT sender_id, sender_username, sender_first_name, text
        FROM messages
        WHERE chat_id = ?1 AND message_id = ?2
        ORDER BY id DESC
        LIMIT 1
        "#,
    ) {
        Ok(stmt) => stmt,
        Err(e) => {
            debug!("Skipping reply resolution: {}", e);
            return;
        }
    };

    let mut resolved: HashMap<(i64, i64), Option<ReplyRef>> = HashMap::new();

    for msg in messages.iter_mut() {
        let Some(reply_id) = msg.record.reply_to_msg_id else {
            continue;
        };
        let key = (msg.record.chat_id, reply_id);

        let reply = resolved
            .entry(key)
            .or_insert_with(|| {
                stmt.query_row(params![key.0, key.1], |row| {
                    let sender_id: Option<i64> = row.get(0)?;
                    let username: Option<String> = row.get(1)?;
                    let first_name: Option<String> = row.get(2)?;
                    Ok(ReplyRef {
                        sender: reply_sender_label(
                            first_name.as_deref(),
                            username.as_deref(),
                            sender_id,
                        ),
                        text: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    })
                })
                .optional()
                .unwrap_or_else(|e| {
                    debug!("Reply lookup failed for {:?}: {}", key, e);
                    None
                })
            })
            .clone();

        msg.reply_content = reply;
    }
}

fn reply_sender_label(
    first_name: Option<&str>,
    username: Option<&str>,
    sender_id: Option<i64>,
) -> String {
    first_name
        .filter(|s| !s.is_empty())
        .or(username.filter(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| match sender_id {
            Some(id) => format!("ID:{}", id),
            None => "ID:None".to_string(),
        })
}
