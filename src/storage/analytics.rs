//! Read-only aggregate queries backing the dashboard API.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use serde::Serialize;

use super::{
    row_to_message, ConversationSummary, MessageStore, StoreError, StoreResult, StoredMessage,
    SELECT_COLUMNS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderRank {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeShare {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyCount {
    pub hour: String,
    pub count: i64,
}

/// Message counts by weekday (0 = Sunday) and hour of day, in UTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyActivity {
    pub counts: [[i64; 24]; 7],
}

fn since_param(since: &DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl MessageStore {
    /// Every conversation seen, with its most recent title
    pub fn list_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        let inner = self.lock()?;

        // SQLite takes the bare columns from the row holding MAX(date)
        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT chat_id, chat_title, MAX(date)
                FROM messages
                WHERE chat_id IS NOT NULL
                GROUP BY chat_id
                ORDER BY chat_title COLLATE NOCASE
                "#,
            )
            .map_err(StoreError::Query)?;

        let conversations = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                Ok(ConversationSummary {
                    id,
                    title: title
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| id.to_string()),
                })
            })
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(conversations)
    }

    /// Substring search over message bodies, newest first
    pub fn search(&self, term: &str, limit: u32) -> StoreResult<Vec<StoredMessage>> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(&format!(
                r#"
                SELECT {} FROM messages
                WHERE text LIKE ?1 ESCAPE '\'
                ORDER BY date DESC, id DESC
                LIMIT ?2
                "#,
                SELECT_COLUMNS
            ))
            .map_err(StoreError::Query)?;

        let messages = stmt
            .query_map(params![like_pattern(term), limit], row_to_message)
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(messages)
    }

    /// Messages per calendar day (UTC) sent since `since`
    pub fn daily_counts(&self, since: DateTime<Utc>) -> StoreResult<Vec<DailyCount>> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT date(date) AS day, COUNT(*)
                FROM messages
                WHERE date >= ?1
                GROUP BY day
                ORDER BY day
                "#,
            )
            .map_err(StoreError::Query)?;

        let counts = stmt
            .query_map(params![since_param(&since)], |row| {
                Ok(DailyCount {
                    day: row.get(0)?,
                    count: row.get(1)?,
                })
            })
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }

    /// Most active senders since `since`
    pub fn top_senders(&self, since: DateTime<Utc>, limit: u32) -> StoreResult<Vec<SenderRank>> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT sender_id, sender_username, sender_first_name, COUNT(*) AS cnt, MAX(id)
                FROM messages
                WHERE date >= ?1 AND sender_id IS NOT NULL
                GROUP BY sender_id
                ORDER BY cnt DESC
                LIMIT ?2
                "#,
            )
            .map_err(StoreError::Query)?;

        let ranking = stmt
            .query_map(params![since_param(&since), limit], |row| {
                let sender_id: i64 = row.get(0)?;
                let username: Option<String> = row.get(1)?;
                let first_name: Option<String> = row.get(2)?;
                let name = username
                    .filter(|s| !s.is_empty())
                    .or(first_name.filter(|s| !s.is_empty()))
                    .unwrap_or_else(|| format!("ID: {}", sender_id));
                Ok(SenderRank {
                    name,
                    count: row.get(3)?,
                })
            })
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(ranking)
    }

    /// Message count per media tag, plain text grouped as `Text`
    pub fn media_distribution(&self) -> StoreResult<Vec<TypeShare>> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT
                    CASE
                        WHEN media_type IS NULL OR media_type = '' THEN 'Text'
                        ELSE media_type
                    END AS kind,
                    COUNT(*) AS value
                FROM messages
                GROUP BY kind
                ORDER BY value DESC
                "#,
            )
            .map_err(StoreError::Query)?;

        let shares = stmt
            .query_map([], |row| {
                Ok(TypeShare {
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(StoreError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(shares)
    }

    /// Message count for each of the 24 hours of the day
    pub fn hourly_activity(&self) -> StoreResult<Vec<HourlyCount>> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT CAST(strftime('%H', date) AS INTEGER) AS hour, COUNT(*)
                FROM messages
                WHERE hour IS NOT NULL
                GROUP BY hour
                "#,
            )
            .map_err(StoreError::Query)?;

        let mut buckets = [0i64; 24];
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .map_err(StoreError::Query)?;
        for (hour, count) in rows.filter_map(|r| r.ok()) {
            if let Some(slot) = usize::try_from(hour).ok().and_then(|h| buckets.get_mut(h)) {
                *slot = count;
            }
        }

        Ok(buckets
            .iter()
            .enumerate()
            .map(|(hour, count)| HourlyCount {
                hour: format!("{:02}", hour),
                count: *count,
            })
            .collect())
    }

    /// Weekday by hour heatmap
    pub fn weekly_activity(&self) -> StoreResult<WeeklyActivity> {
        let inner = self.lock()?;

        let mut stmt = inner
            .conn
            .prepare(
                r#"
                SELECT CAST(strftime('%w', date) AS INTEGER) AS weekday,
                       CAST(strftime('%H', date) AS INTEGER) AS hour,
                       COUNT(*)
                FROM messages
                WHERE weekday IS NOT NULL AND hour IS NOT NULL
                GROUP BY weekday, hour
                "#,
            )
            .map_err(StoreError::Query)?;

        let mut counts = [[0i64; 24]; 7];
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(StoreError::Query)?;
        for (weekday, hour, count) in rows.filter_map(|r| r.ok()) {
            if let (Ok(d), Ok(h)) = (usize::try_from(weekday), usize::try_from(hour)) {
                if d < 7 && h < 24 {
                    counts[d][h] = count;
                }
            }
        }

        Ok(WeeklyActivity { counts })
    }

    /// Total number of stored messages
    pub fn message_count(&self) -> StoreResult<i64> {
        let inner = self.lock()?;
        inner
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(StoreError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::record;
    use crate::storage::MediaKind;
    use chrono::TimeZone;

    fn seeded_store() -> MessageStore {
        let store = MessageStore::open_in_memory().unwrap();

        // 2024-05-01 is a Wednesday
        let mut a = record(1, 1, "Hello world");
        a.date = Utc.with_ymd_and_hms(2024, 5, 1, 9, 15, 0).unwrap();
        a.chat_title = "Zeta".to_string();
        let mut b = record(1, 2, "hello again");
        b.date = Utc.with_ymd_and_hms(2024, 5, 1, 9, 45, 0).unwrap();
        b.chat_title = "Zeta renamed".to_string();
        let mut c = record(2, 1, "100% sure");
        c.date = Utc.with_ymd_and_hms(2024, 5, 2, 22, 0, 0).unwrap();
        c.chat_title = "alpha".to_string();
        c.sender_id = Some(9);
        c.sender_username = None;
        c.sender_first_name = Some("Carol".to_string());
        c.media_type = Some(MediaKind::Photo);

        for r in [a, b, c] {
            store.save(&r).unwrap();
        }
        store
    }

    #[test]
    fn test_list_conversations_uses_latest_title() {
        let store = seeded_store();
        let conversations = store.list_conversations().unwrap();
        assert_eq!(
            conversations,
            vec![
                ConversationSummary {
                    id: 2,
                    title: "alpha".to_string()
                },
                ConversationSummary {
                    id: 1,
                    title: "Zeta renamed".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let store = seeded_store();
        let hits = store.search("HELLO", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.text, "hello again");

        let percent = store.search("%", 10).unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].record.text, "100% sure");
    }

    #[test]
    fn test_daily_counts_and_ranking() {
        let store = seeded_store();
        let since = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();

        let daily = store.daily_counts(since).unwrap();
        assert_eq!(
            daily,
            vec![
                DailyCount {
                    day: "2024-05-01".to_string(),
                    count: 2
                },
                DailyCount {
                    day: "2024-05-02".to_string(),
                    count: 1
                },
            ]
        );

        let ranking = store.top_senders(since, 10).unwrap();
        assert_eq!(ranking[0], SenderRank {
            name: "alice".to_string(),
            count: 2
        });
        assert_eq!(ranking[1].name, "Carol");

        let later = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert_eq!(store.daily_counts(later).unwrap().len(), 1);
    }

    #[test]
    fn test_activity_buckets() {
        let store = seeded_store();

        let hourly = store.hourly_activity().unwrap();
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly[9].count, 2);
        assert_eq!(hourly[22].count, 1);
        assert_eq!(hourly[0].hour, "00");

        let weekly = store.weekly_activity().unwrap();
        assert_eq!(weekly.counts[3][9], 2);
        assert_eq!(weekly.counts[4][22], 1);

        let types = store.media_distribution().unwrap();
        assert_eq!(types[0], TypeShare {
            name: "Text".to_string(),
            value: 2
        });
        assert_eq!(store.message_count().unwrap(), 3);
    }
}
