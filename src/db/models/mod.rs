pub mod chat;
pub mod note;
pub mod queue;
pub mod summary;
pub mod word;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use chat::{ChatRole, ChatTurn};
pub use note::NoteEvent;
pub use queue::{QueueItem, QueueKind};
pub use summary::{SummaryRecord, Term};
pub use word::{WordContext, WordEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowOrigin {
    /// Produced by a user action on this device.
    Local,
    /// Merged from a remote change notification.
    Remote,
}

impl RowOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOrigin::Local => "local",
            RowOrigin::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "local" => Ok(RowOrigin::Local),
            "remote" => Ok(RowOrigin::Remote),
            other => Err(anyhow::anyhow!("unknown row origin '{other}'")),
        }
    }
}

/// A persisted row: local sequence id, client uid shared with the remote
/// store, and the record itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRow<T> {
    pub id: i64,
    pub uid: String,
    pub origin: RowOrigin,
    #[serde(flatten)]
    pub record: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyStats {
    pub words_learned: u64,
    /// Consecutive days with at least one lookup, ending today or yesterday.
    pub streak_days: u32,
    pub last_active: Option<DateTime<Utc>>,
}
