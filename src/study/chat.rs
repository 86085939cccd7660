use chrono::Utc;
use log::{error, warn};

use crate::assistant::{ChatRequest, HistoryTurn};
use crate::bus::{Bus, BusEvent};
use crate::db::{ChatRole, ChatTurn, Database, StoredRow};

use super::StudyError;

/// Turns sent to the assistant as conversation history.
pub const HISTORY_WINDOW: usize = 10;

/// A per-video conversation with the assistant.
pub struct ChatSession {
    db: Database,
    bus: Bus,
}

impl ChatSession {
    pub fn new(db: Database, bus: Bus) -> Self {
        Self { db, bus }
    }

    pub async fn history(&self, video_id: &str) -> Result<Vec<StoredRow<ChatTurn>>, StudyError> {
        Ok(self.db.chat_history(video_id).await?)
    }

    /// Records the user's message, asks the assistant and records its answer.
    ///
    /// When the assistant fails, an explanatory reply is stored locally (never
    /// synced) and the failure is returned.
    pub async fn send(&self, video_id: &str, text: &str) -> Result<StoredRow<ChatTurn>, StudyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StudyError::EmptyText);
        }

        let user_turn = self
            .db
            .record_chat_turn(turn(video_id, ChatRole::User, text.to_string()))
            .await?;
        self.bus.emit(BusEvent::ChatAdded(user_turn));

        let turns = self.db.chat_history(video_id).await?;
        let history = turns
            .iter()
            .skip(turns.len().saturating_sub(HISTORY_WINDOW))
            .map(|row| HistoryTurn {
                role: row.record.role,
                text: row.record.text.clone(),
            })
            .collect();

        let context = match self.db.get_summary(video_id).await {
            Ok(summary) => summary.map(|summary| summary.bullet_points.join("\n")),
            Err(err) => {
                warn!("summary unavailable as chat context: {err:?}");
                None
            }
        };

        let request = ChatRequest {
            prompt: text.to_string(),
            history,
            context,
            video_id: Some(video_id.to_string()),
        };

        match self.bus.ask(request).await {
            Ok(reply) => {
                let row = self
                    .db
                    .record_chat_turn(turn(video_id, ChatRole::Assistant, reply.response))
                    .await?;
                self.bus.emit(BusEvent::ChatAdded(row.clone()));
                Ok(row)
            }
            Err(err) => {
                warn!("assistant failed for video {video_id}: {err}");
                let apology = format!("Sorry, I couldn't answer: {}", err.user_message());
                match self
                    .db
                    .record_unsynced_chat_turn(turn(video_id, ChatRole::Assistant, apology))
                    .await
                {
                    Ok(row) => self.bus.emit(BusEvent::ChatAdded(row)),
                    Err(store_err) => error!("failed to store chat error reply: {store_err:?}"),
                }
                Err(err.into())
            }
        }
    }
}

fn turn(video_id: &str, role: ChatRole, text: String) -> ChatTurn {
    ChatTurn {
        video_id: video_id.to_string(),
        role,
        text,
        timestamp: Utc::now(),
    }
}
