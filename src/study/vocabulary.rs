use crate::db::{Database, StoredRow, VocabularyStats, WordEvent};

use super::StudyError;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Read side of the saved words.
pub struct Vocabulary {
    db: Database,
}

impl Vocabulary {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Newest first, at most `limit` (default page size when `None`).
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<StoredRow<WordEvent>>, StudyError> {
        Ok(self
            .db
            .recent_words(limit.unwrap_or(DEFAULT_PAGE_SIZE))
            .await?)
    }

    pub async fn stats(&self) -> Result<VocabularyStats, StudyError> {
        Ok(self.db.vocabulary_stats().await?)
    }
}
