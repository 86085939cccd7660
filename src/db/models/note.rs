use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub video_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
