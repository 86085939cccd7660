use log::info;

use crate::assistant::SummarizeRequest;
use crate::bus::Bus;
use crate::db::{Database, SummaryRecord};

use super::StudyError;

/// Generates and keeps one summary per video.
pub struct Summarizer {
    db: Database,
    bus: Bus,
}

impl Summarizer {
    pub fn new(db: Database, bus: Bus) -> Self {
        Self { db, bus }
    }

    /// Asks the assistant for a summary and replaces any stored one.
    pub async fn summarize(
        &self,
        video_id: &str,
        transcript: &str,
        language: &str,
    ) -> Result<SummaryRecord, StudyError> {
        if transcript.trim().is_empty() {
            return Err(StudyError::EmptyText);
        }

        let reply = self
            .bus
            .summarize(SummarizeRequest {
                video_id: video_id.to_string(),
                transcript: transcript.to_string(),
                language: language.to_string(),
            })
            .await?;

        let record = SummaryRecord {
            video_id: video_id.to_string(),
            bullet_points: reply.summary,
            terms: reply.terms,
        };
        self.db.upsert_summary(record.clone()).await?;
        info!(
            "summary stored for video {video_id} ({} points, {} terms)",
            record.bullet_points.len(),
            record.terms.len()
        );
        Ok(record)
    }

    pub async fn get(&self, video_id: &str) -> Result<Option<SummaryRecord>, StudyError> {
        Ok(self.db.get_summary(video_id).await?)
    }

    /// Markdown export of the stored summary, if there is one.
    pub async fn export_markdown(&self, video_id: &str) -> Result<Option<String>, StudyError> {
        Ok(self.get(video_id).await?.map(|record| record.to_markdown()))
    }
}
