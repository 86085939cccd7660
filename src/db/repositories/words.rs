use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::queue::{enqueue_on, queue_payload};
use crate::db::{
    connection::{ChangeKind, Database, Table},
    helpers::{format_datetime, invalid_data, parse_datetime},
    models::{QueueKind, RowOrigin, StoredRow, VocabularyStats, WordEvent},
};

fn row_to_word(row: &Row) -> rusqlite::Result<StoredRow<WordEvent>> {
    let timestamp: String = row.get("timestamp")?;
    let context_json: String = row.get("context_json")?;
    let origin: String = row.get("origin")?;

    Ok(StoredRow {
        id: row.get("id")?,
        uid: row.get("uid")?,
        origin: RowOrigin::parse(&origin).map_err(invalid_data)?,
        record: WordEvent {
            original_word: row.get("original_word")?,
            target_word: row.get("target_word")?,
            source_language: row.get("source_language")?,
            target_language: row.get("target_language")?,
            timestamp: parse_datetime(&timestamp, "timestamp").map_err(invalid_data)?,
            context: serde_json::from_str(&context_json).map_err(invalid_data)?,
        },
    })
}

/// Length of the run of consecutive days in `days` that ends today or
/// yesterday. `days` must be distinct and sorted newest first.
pub fn compute_streak(days: &[NaiveDate], today: NaiveDate) -> u32 {
    let Some(first) = days.first() else {
        return 0;
    };
    if *first != today && *first != today - Duration::days(1) {
        return 0;
    }

    let mut expected = *first;
    let mut streak = 0;
    for day in days {
        if *day != expected {
            break;
        }
        streak += 1;
        expected -= Duration::days(1);
    }
    streak
}

impl Database {
    /// Stores a looked-up word and queues it for the remote store in one
    /// transaction.
    pub async fn record_word(&self, event: WordEvent) -> Result<StoredRow<WordEvent>> {
        let stored = self
            .execute(move |conn| {
                let uid = Uuid::new_v4().to_string();
                let payload = queue_payload(&uid, &event)?;

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO words (uid, original_word, target_word, source_language, target_language, timestamp, context_json, origin)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'local')",
                    params![
                        uid,
                        event.original_word,
                        event.target_word,
                        event.source_language,
                        event.target_language,
                        format_datetime(&event.timestamp),
                        serde_json::to_string(&event.context)?,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                enqueue_on(&tx, QueueKind::SaveWord, &payload)?;
                tx.commit()?;

                Ok(StoredRow {
                    id,
                    uid,
                    origin: RowOrigin::Local,
                    record: event,
                })
            })
            .await?;

        self.publish(
            &[Table::Words, Table::Queue],
            ChangeKind::Inserted,
            RowOrigin::Local,
        );
        Ok(stored)
    }

    /// Inserts a word pushed by the remote store unless a row with the same
    /// `uid` exists. Never touches the queue.
    pub async fn merge_remote_word(
        &self,
        uid: &str,
        event: WordEvent,
    ) -> Result<Option<StoredRow<WordEvent>>> {
        let uid = uid.to_string();
        let merged = self
            .execute(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO words (uid, original_word, target_word, source_language, target_language, timestamp, context_json, origin)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'remote')",
                    params![
                        uid,
                        event.original_word,
                        event.target_word,
                        event.source_language,
                        event.target_language,
                        format_datetime(&event.timestamp),
                        serde_json::to_string(&event.context)?,
                    ],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                Ok(Some(StoredRow {
                    id: conn.last_insert_rowid(),
                    uid,
                    origin: RowOrigin::Remote,
                    record: event,
                }))
            })
            .await?;

        if merged.is_some() {
            self.publish(&[Table::Words], ChangeKind::Inserted, RowOrigin::Remote);
        }
        Ok(merged)
    }

    /// Newest first.
    pub async fn recent_words(&self, limit: usize) -> Result<Vec<StoredRow<WordEvent>>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, uid, original_word, target_word, source_language, target_language, timestamp, context_json, origin
                 FROM words
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;
            let words = stmt
                .query_map(params![limit], row_to_word)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(words)
        })
        .await
    }

    pub async fn word_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM words", [], |row| row.get(0))?;
            Ok(u64::try_from(count)?)
        })
        .await
    }

    pub async fn vocabulary_stats(&self) -> Result<VocabularyStats> {
        let today = Utc::now().date_naive();
        self.execute(move |conn| {
            let (count, last): (i64, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MAX(timestamp) FROM words",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT DISTINCT substr(timestamp, 1, 10) AS day
                 FROM words
                 ORDER BY day DESC",
            )?;
            let days = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .iter()
                .map(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d"))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(VocabularyStats {
                words_learned: u64::try_from(count)?,
                streak_days: compute_streak(&days, today),
                last_active: last
                    .map(|value| parse_datetime(&value, "timestamp"))
                    .transpose()?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{at, temp_database};
    use super::*;
    use crate::db::models::WordContext;

    fn word(original: &str, hour: u32) -> WordEvent {
        WordEvent {
            original_word: original.into(),
            target_word: format!("{original}-en"),
            source_language: "fr".into(),
            target_language: "en".into(),
            timestamp: at(hour, 0),
            context: WordContext {
                source: "youtube".into(),
                url: "https://www.youtube.com/watch?v=abc".into(),
                video_title: Some("Lesson".into()),
            },
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn recording_a_word_also_queues_it() {
        let (_dir, db) = temp_database();
        let stored = db.record_word(word("bonjour", 9)).await.unwrap();

        let queue = db.pending_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind, QueueKind::SaveWord);
        assert_eq!(queue[0].doc_id(), Some(stored.uid.as_str()));
        assert_eq!(queue[0].payload["originalWord"], "bonjour");
    }

    #[tokio::test]
    async fn remote_merge_is_idempotent_and_never_queues() {
        let (_dir, db) = temp_database();
        let merged = db.merge_remote_word("r-1", word("merci", 8)).await.unwrap();
        assert_eq!(merged.map(|row| row.origin), Some(RowOrigin::Remote));
        assert!(db
            .merge_remote_word("r-1", word("merci", 8))
            .await
            .unwrap()
            .is_none());

        assert_eq!(db.word_count().await.unwrap(), 1);
        assert_eq!(db.queue_len().await.unwrap(), 0);
        let words = db.recent_words(10).await.unwrap();
        assert_eq!(words[0].origin, RowOrigin::Remote);
    }

    #[tokio::test]
    async fn echo_of_a_local_write_is_ignored() {
        let (_dir, db) = temp_database();
        let stored = db.record_word(word("bonjour", 9)).await.unwrap();
        assert!(db
            .merge_remote_word(&stored.uid, stored.record.clone())
            .await
            .unwrap()
            .is_none());
        assert_eq!(db.word_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_words_are_newest_first_and_limited() {
        let (_dir, db) = temp_database();
        db.record_word(word("un", 8)).await.unwrap();
        db.record_word(word("trois", 10)).await.unwrap();
        db.record_word(word("deux", 9)).await.unwrap();

        let words = db.recent_words(2).await.unwrap();
        let names: Vec<&str> = words
            .iter()
            .map(|row| row.record.original_word.as_str())
            .collect();
        assert_eq!(names, vec!["trois", "deux"]);
    }

    #[tokio::test]
    async fn stats_report_count_and_last_activity() {
        let (_dir, db) = temp_database();
        let empty = db.vocabulary_stats().await.unwrap();
        assert_eq!(empty.words_learned, 0);
        assert_eq!(empty.streak_days, 0);
        assert!(empty.last_active.is_none());

        db.record_word(word("un", 8)).await.unwrap();
        db.record_word(word("deux", 11)).await.unwrap();
        let stats = db.vocabulary_stats().await.unwrap();
        assert_eq!(stats.words_learned, 2);
        assert_eq!(stats.last_active, Some(at(11, 0)));
    }

    #[test]
    fn streak_counts_consecutive_days_ending_today_or_yesterday() {
        let today = day(2024, 5, 10);
        assert_eq!(compute_streak(&[], today), 0);
        assert_eq!(
            compute_streak(&[day(2024, 5, 10), day(2024, 5, 9), day(2024, 5, 7)], today),
            2
        );
        assert_eq!(
            compute_streak(&[day(2024, 5, 9), day(2024, 5, 8)], today),
            2
        );
        assert_eq!(compute_streak(&[day(2024, 5, 8)], today), 0);
    }
}
