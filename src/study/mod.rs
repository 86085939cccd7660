//! Per-video study features: chat, notes, summaries and the vocabulary view.

pub mod chat;
pub mod notes;
pub mod summary;
pub mod vocabulary;

use thiserror::Error;

use crate::bus::BusError;

pub use chat::{ChatSession, HISTORY_WINDOW};
pub use notes::Notebook;
pub use summary::Summarizer;
pub use vocabulary::{Vocabulary, DEFAULT_PAGE_SIZE};

#[derive(Debug, Error)]
pub enum StudyError {
    #[error("text is empty")]
    EmptyText,
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("local storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl StudyError {
    pub fn user_message(&self) -> String {
        match self {
            StudyError::EmptyText => "Type something first".to_string(),
            StudyError::Bus(err) => err.user_message(),
            StudyError::Storage(_) => "Could not save, please try again".to_string(),
        }
    }
}
