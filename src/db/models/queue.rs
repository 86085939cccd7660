//! Durable intent log of local writes awaiting remote acceptance.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::Collection;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueKind {
    #[serde(rename = "SAVE_WORD")]
    SaveWord,
    #[serde(rename = "SAVE_NOTE")]
    SaveNote,
    #[serde(rename = "SAVE_CHAT")]
    SaveChat,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::SaveWord => "SAVE_WORD",
            QueueKind::SaveNote => "SAVE_NOTE",
            QueueKind::SaveChat => "SAVE_CHAT",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "SAVE_WORD" => Ok(QueueKind::SaveWord),
            "SAVE_NOTE" => Ok(QueueKind::SaveNote),
            "SAVE_CHAT" => Ok(QueueKind::SaveChat),
            other => Err(anyhow!("unknown queue item type '{other}'")),
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            QueueKind::SaveWord => Collection::Vocabulary,
            QueueKind::SaveNote => Collection::Notes,
            QueueKind::SaveChat => Collection::Chats,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: QueueKind,
    /// The record as it will be stored remotely, including its `uid`.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// The remote document id: the client-generated `uid` of the row.
    pub fn doc_id(&self) -> Option<&str> {
        self.payload.get("uid").and_then(|value| value.as_str())
    }
}
