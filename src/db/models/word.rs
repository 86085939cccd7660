//! Looked-up words.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a lookup happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WordContext {
    pub source: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
}

/// A translated word the user looked up. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WordEvent {
    pub original_word: String,
    pub target_word: String,
    pub source_language: String,
    pub target_language: String,
    pub timestamp: DateTime<Utc>,
    pub context: WordContext,
}
