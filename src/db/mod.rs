mod connection;
pub mod helpers;
pub mod migrations;
pub mod models;
mod repositories;

pub use connection::{ChangeKind, Database, Table, TableChange};
pub use repositories::compute_streak;
pub use models::{
    ChatRole, ChatTurn, NoteEvent, QueueItem, QueueKind, RowOrigin, StoredRow, SummaryRecord,
    Term, VocabularyStats, WordContext, WordEvent,
};
