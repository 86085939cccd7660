//! The remote document store the sync engine replicates into.
//!
//! Documents live under `users/{uid}/{collection}/{doc_id}`. Writes are
//! idempotent puts keyed by the client-generated row `uid`.

mod memory;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Vocabulary,
    Notes,
    Chats,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Vocabulary, Collection::Notes, Collection::Chats];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Vocabulary => "vocabulary",
            Collection::Notes => "notes",
            Collection::Chats => "chats",
        }
    }

    pub fn path(&self, user: &UserId) -> String {
        format!("users/{}/{}", user.as_str(), self.name())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in account as reported by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            email: None,
            display_name: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store is unavailable")]
    Unavailable,
    #[error("not authenticated with the remote store")]
    Unauthenticated,
    #[error("remote store rejected the write: {0}")]
    Rejected(String),
    #[error("remote listener closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub kind: ChangeType,
    pub doc_id: String,
    pub data: Value,
}

pub trait RemoteStore: Send + Sync + 'static {
    /// Creates or replaces `users/{user}/{collection}/{doc_id}`.
    fn put(
        &self,
        user: &UserId,
        collection: Collection,
        doc_id: &str,
        data: Value,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Opens a standing listener. The receiver first yields every existing
    /// document as `Added`, newest first, then live changes as they happen.
    fn subscribe(
        &self,
        user: &UserId,
        collection: Collection,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<RemoteChange>, RemoteError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_scoped_under_the_user() {
        let user = UserId::new("u1");
        assert_eq!(Collection::Vocabulary.path(&user), "users/u1/vocabulary");
        assert_eq!(Collection::Chats.path(&user), "users/u1/chats");
    }
}
