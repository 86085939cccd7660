//! Translation, chat and summarization providers behind one seam.

mod callable;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{ChatRole, Term};

pub use callable::CallableAssistant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslateRequest {
    pub word: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    pub detected_source_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryTurn {
    pub role: ChatRole,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    pub history: Vec<HistoryTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub video_id: String,
    pub transcript: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryReply {
    pub summary: Vec<String>,
    pub terms: Vec<Term>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum AssistantError {
    #[error("assistant backend is not configured")]
    NotReady,
    #[error("network error: {0}")]
    Network(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AssistantError {
    /// Short, actionable text for tooltips and chat bubbles.
    pub fn user_message(&self) -> &'static str {
        match self {
            AssistantError::NotReady => "Assistant is still starting up, please retry in a moment",
            AssistantError::Network(_) => "Connection error, please retry",
            AssistantError::Provider(_) => "The service could not answer, please retry",
            AssistantError::InvalidResponse(_) => "Unexpected reply from the service, please retry",
        }
    }
}

pub trait AssistantClient: Send + Sync + 'static {
    fn translate(
        &self,
        request: TranslateRequest,
    ) -> impl Future<Output = Result<Translation, AssistantError>> + Send;

    fn chat(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, AssistantError>> + Send;

    fn summarize(
        &self,
        request: SummarizeRequest,
    ) -> impl Future<Output = Result<SummaryReply, AssistantError>> + Send;
}

/// Stand-in used when no backend is configured: every call fails with
/// `NotReady`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredAssistant;

impl AssistantClient for UnconfiguredAssistant {
    async fn translate(&self, _request: TranslateRequest) -> Result<Translation, AssistantError> {
        Err(AssistantError::NotReady)
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatReply, AssistantError> {
        Err(AssistantError::NotReady)
    }

    async fn summarize(&self, _request: SummarizeRequest) -> Result<SummaryReply, AssistantError> {
        Err(AssistantError::NotReady)
    }
}
