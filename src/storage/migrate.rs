//! Schema creation and in-place evolution of the `messages` table.

use rusqlite::Connection;
use tracing::{error, info};

use super::StoreError;

/// Column definitions of the current table shape
const MESSAGES_COLUMNS: &str = r#"
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER,
    chat_id INTEGER,
    chat_title TEXT,
    chat_type TEXT,
    sender_id INTEGER,
    sender_username TEXT,
    sender_first_name TEXT,
    sender_last_name TEXT,
    text TEXT,
    date TEXT,
    media_type TEXT,
    is_forwarded BOOLEAN,
    forward_from TEXT,
    reply_to_msg_id INTEGER,
    created_at TEXT,
    is_edited INTEGER DEFAULT 0
"#;

/// Every column of the current shape, in table order
const CURRENT_COLUMNS: &[&str] = &[
    "id",
    "message_id",
    "chat_id",
    "chat_title",
    "chat_type",
    "sender_id",
    "sender_username",
    "sender_first_name",
    "sender_last_name",
    "text",
    "date",
    "media_type",
    "is_forwarded",
    "forward_from",
    "reply_to_msg_id",
    "created_at",
    "is_edited",
];

/// Columns introduced after the first release, added in place when missing
const ADDED_COLUMNS: &[(&str, &str)] = &[("is_edited", "INTEGER DEFAULT 0")];

const LEGACY_COLUMN: &str = "raw_data";

/// Storage timestamps written before microseconds were recorded,
/// `YYYY-MM-DD HH:MM:SS`
const SECOND_PRECISION_LEN: i64 = 19;

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
    CREATE INDEX IF NOT EXISTS idx_messages_sender_id ON messages(sender_id);
    CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date);
"#;

/// Bring the database to the current shape. Safe to run on every start.
pub(super) fn init_schema(conn: &mut Connection) -> Result<(), StoreError> {
    let columns = table_columns(conn)?;

    if columns.iter().any(|c| c == LEGACY_COLUMN) {
        info!("Found legacy '{}' column, removing it...", LEGACY_COLUMN);
        match drop_legacy_column(conn, &columns) {
            Ok(()) => info!("Legacy '{}' column removed", LEGACY_COLUMN),
            Err(e) => error!(
                "Failed to remove legacy '{}' column, the table was left unchanged and may need manual cleanup: {}",
                LEGACY_COLUMN, e
            ),
        }
    } else {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS messages ({});",
            MESSAGES_COLUMNS
        ))
        .map_err(StoreError::Migration)?;
    }

    add_missing_columns(conn)?;
    pad_stored_at(conn)?;

    conn.execute_batch(INDEXES).map_err(StoreError::Migration)?;

    Ok(())
}

/// Names of the columns `messages` currently has (empty if it doesn't exist)
fn table_columns(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info('messages')")
        .map_err(StoreError::Migration)?;

    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(StoreError::Migration)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(columns)
}

/// Rebuild `messages` without the legacy column.
///
/// Runs in one transaction: if any step fails the transaction is dropped
/// uncommitted and the original table stays as it was.
fn drop_legacy_column(conn: &mut Connection, existing: &[String]) -> rusqlite::Result<()> {
    let surviving = CURRENT_COLUMNS
        .iter()
        .copied()
        .filter(|column| existing.iter().any(|e| e == column))
        .collect::<Vec<_>>()
        .join(", ");

    let tx = conn.transaction()?;

    // Left behind by a run that died mid-rebuild
    tx.execute_batch("DROP TABLE IF EXISTS messages_new;")?;
    tx.execute_batch(&format!("CREATE TABLE messages_new ({});", MESSAGES_COLUMNS))?;
    tx.execute(
        &format!(
            "INSERT INTO messages_new ({cols}) SELECT {cols} FROM messages",
            cols = surviving
        ),
        [],
    )?;
    tx.execute_batch(
        r#"
        DROP TABLE messages;
        ALTER TABLE messages_new RENAME TO messages;
        "#,
    )?;

    tx.commit()
}

/// Give second-precision `created_at` values a zero fraction so they compare
/// correctly against microsecond window bounds.
fn pad_stored_at(conn: &Connection) -> Result<(), StoreError> {
    let updated = conn
        .execute(
            "UPDATE messages SET created_at = created_at || '.000000' WHERE length(created_at) = ?1",
            [SECOND_PRECISION_LEN],
        )
        .map_err(StoreError::Migration)?;

    if updated > 0 {
        info!("Migrating database: padded {} storage timestamps", updated);
    }
    Ok(())
}

fn add_missing_columns(conn: &Connection) -> Result<(), StoreError> {
    let columns = table_columns(conn)?;

    for (name, definition) in ADDED_COLUMNS {
        if columns.iter().any(|c| c == name) {
            continue;
        }
        info!("Migrating database: adding '{}' column...", name);
        conn.execute_batch(&format!(
            "ALTER TABLE messages ADD COLUMN {} {};",
            name, definition
        ))
        .map_err(StoreError::Migration)?;
    }

    Ok(())
}
