use anyhow::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::queue::{enqueue_on, queue_payload};
use crate::db::{
    connection::{ChangeKind, Database, Table},
    helpers::{format_datetime, invalid_data, parse_datetime},
    models::{NoteEvent, QueueKind, RowOrigin, StoredRow},
};

fn row_to_note(row: &Row) -> rusqlite::Result<StoredRow<NoteEvent>> {
    let timestamp: String = row.get("timestamp")?;
    let origin: String = row.get("origin")?;

    Ok(StoredRow {
        id: row.get("id")?,
        uid: row.get("uid")?,
        origin: RowOrigin::parse(&origin).map_err(invalid_data)?,
        record: NoteEvent {
            video_id: row.get("video_id")?,
            text: row.get("text")?,
            timestamp: parse_datetime(&timestamp, "timestamp").map_err(invalid_data)?,
        },
    })
}

impl Database {
    pub async fn add_note(&self, note: NoteEvent) -> Result<StoredRow<NoteEvent>> {
        let stored = self
            .execute(move |conn| {
                let uid = Uuid::new_v4().to_string();
                let payload = queue_payload(&uid, &note)?;

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO notes (uid, video_id, text, timestamp, origin)
                     VALUES (?1, ?2, ?3, ?4, 'local')",
                    params![uid, note.video_id, note.text, format_datetime(&note.timestamp)],
                )?;
                let id = tx.last_insert_rowid();
                enqueue_on(&tx, QueueKind::SaveNote, &payload)?;
                tx.commit()?;

                Ok(StoredRow {
                    id,
                    uid,
                    origin: RowOrigin::Local,
                    record: note,
                })
            })
            .await?;

        self.publish(
            &[Table::Notes, Table::Queue],
            ChangeKind::Inserted,
            RowOrigin::Local,
        );
        Ok(stored)
    }

    pub async fn merge_remote_note(
        &self,
        uid: &str,
        note: NoteEvent,
    ) -> Result<Option<StoredRow<NoteEvent>>> {
        let uid = uid.to_string();
        let merged = self
            .execute(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO notes (uid, video_id, text, timestamp, origin)
                     VALUES (?1, ?2, ?3, ?4, 'remote')",
                    params![uid, note.video_id, note.text, format_datetime(&note.timestamp)],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                Ok(Some(StoredRow {
                    id: conn.last_insert_rowid(),
                    uid,
                    origin: RowOrigin::Remote,
                    record: note,
                }))
            })
            .await?;

        if merged.is_some() {
            self.publish(&[Table::Notes], ChangeKind::Inserted, RowOrigin::Remote);
        }
        Ok(merged)
    }

    /// Chronological.
    pub async fn notes_for_video(&self, video_id: &str) -> Result<Vec<StoredRow<NoteEvent>>> {
        let video_id = video_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, uid, video_id, text, timestamp, origin
                 FROM notes
                 WHERE video_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let notes = stmt
                .query_map(params![video_id], row_to_note)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{at, temp_database};
    use super::*;

    fn note(video_id: &str, text: &str, minute: u32) -> NoteEvent {
        NoteEvent {
            video_id: video_id.into(),
            text: text.into(),
            timestamp: at(12, minute),
        }
    }

    #[tokio::test]
    async fn notes_are_scoped_to_their_video_in_order() {
        let (_dir, db) = temp_database();
        db.add_note(note("abc", "second", 5)).await.unwrap();
        db.add_note(note("abc", "first", 1)).await.unwrap();
        db.add_note(note("xyz", "other", 3)).await.unwrap();

        let notes = db.notes_for_video("abc").await.unwrap();
        let texts: Vec<&str> = notes.iter().map(|row| row.record.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(db.queue_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn remote_notes_bypass_the_queue() {
        let (_dir, db) = temp_database();
        assert!(db
            .merge_remote_note("n-1", note("abc", "hi", 0))
            .await
            .unwrap()
            .is_some());
        assert!(db
            .merge_remote_note("n-1", note("abc", "hi", 0))
            .await
            .unwrap()
            .is_none());
        assert_eq!(db.notes_for_video("abc").await.unwrap().len(), 1);
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }
}
