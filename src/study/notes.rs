use chrono::Utc;
use log::info;

use crate::bus::{Bus, BusEvent};
use crate::db::{Database, NoteEvent, StoredRow};

use super::StudyError;

/// Timestamped notes for one video at a time.
pub struct Notebook {
    db: Database,
    bus: Bus,
}

impl Notebook {
    pub fn new(db: Database, bus: Bus) -> Self {
        Self { db, bus }
    }

    /// Saves a note locally and queues it for sync. Blank notes are refused.
    pub async fn add(&self, video_id: &str, text: &str) -> Result<StoredRow<NoteEvent>, StudyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StudyError::EmptyText);
        }

        let row = self
            .db
            .add_note(NoteEvent {
                video_id: video_id.to_string(),
                text: text.to_string(),
                timestamp: Utc::now(),
            })
            .await?;
        info!("note {} saved for video {video_id}", row.uid);
        self.bus.emit(BusEvent::NoteAdded(row.clone()));
        Ok(row)
    }

    pub async fn list(&self, video_id: &str) -> Result<Vec<StoredRow<NoteEvent>>, StudyError> {
        Ok(self.db.notes_for_video(video_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueueKind;

    fn notebook() -> (tempfile::TempDir, Database, Bus, Notebook) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("learnflow.sqlite3")).unwrap();
        let (bus, _inbox) = Bus::new();
        let notebook = Notebook::new(db.clone(), bus.clone());
        (dir, db, bus, notebook)
    }

    #[tokio::test]
    async fn notes_are_trimmed_queued_and_announced() {
        let (_dir, db, bus, notebook) = notebook();
        let mut events = bus.subscribe();

        let row = notebook.add("abc", "  photosynthesis needs light \n").await.unwrap();
        assert_eq!(row.record.text, "photosynthesis needs light");

        match events.recv().await.unwrap() {
            BusEvent::NoteAdded(added) => assert_eq!(added, row),
            other => panic!("unexpected event {other:?}"),
        }
        let queue = db.pending_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind, QueueKind::SaveNote);
    }

    #[tokio::test]
    async fn blank_notes_are_refused() {
        let (_dir, db, _bus, notebook) = notebook();
        assert!(matches!(
            notebook.add("abc", "   ").await,
            Err(StudyError::EmptyText)
        ));
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn listing_is_per_video_and_chronological() {
        let (_dir, _db, _bus, notebook) = notebook();
        notebook.add("abc", "first").await.unwrap();
        notebook.add("other", "elsewhere").await.unwrap();
        notebook.add("abc", "second").await.unwrap();

        let texts: Vec<String> = notebook
            .list("abc")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.record.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
