use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ChangeType, Collection, RemoteChange, RemoteError, RemoteStore, UserId};

struct StoredDoc {
    seq: u64,
    data: Value,
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    offline: bool,
    rejected: HashSet<String>,
    docs: HashMap<String, HashMap<String, StoredDoc>>,
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<RemoteChange>>>,
}

/// In-process remote store. Used for loopback mode and as a test double;
/// supports simulated outages and per-document rejections.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Every later put of `doc_id` fails with `Rejected` until cleared.
    pub fn reject_doc(&self, doc_id: &str) {
        self.lock().rejected.insert(doc_id.to_string());
    }

    pub fn clear_rejections(&self) {
        self.lock().rejected.clear();
    }

    /// Snapshot of a collection, newest write first.
    pub fn documents(&self, user: &UserId, collection: Collection) -> Vec<(String, Value)> {
        Self::sorted_docs(&self.lock(), &collection.path(user))
    }

    fn sorted_docs(state: &MemoryState, path: &str) -> Vec<(String, Value)> {
        let Some(docs) = state.docs.get(path) else {
            return Vec::new();
        };
        let mut entries: Vec<(&String, &StoredDoc)> = docs.iter().collect();
        entries.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
        entries
            .into_iter()
            .map(|(id, doc)| (id.clone(), doc.data.clone()))
            .collect()
    }

    fn notify(state: &mut MemoryState, path: &str, change: RemoteChange) {
        if let Some(listeners) = state.listeners.get_mut(path) {
            listeners.retain(|listener| listener.send(change.clone()).is_ok());
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn put(
        &self,
        user: &UserId,
        collection: Collection,
        doc_id: &str,
        data: Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Unavailable);
        }
        if state.rejected.contains(doc_id) {
            return Err(RemoteError::Rejected(format!("document {doc_id} refused")));
        }

        let path = collection.path(user);
        state.next_seq += 1;
        let seq = state.next_seq;
        let previous = state.docs.entry(path.clone()).or_default().insert(
            doc_id.to_string(),
            StoredDoc {
                seq,
                data: data.clone(),
            },
        );

        let kind = if previous.is_some() {
            ChangeType::Modified
        } else {
            ChangeType::Added
        };
        debug!("remote put {path}/{doc_id} ({kind:?})");
        Self::notify(
            &mut state,
            &path,
            RemoteChange {
                kind,
                doc_id: doc_id.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        user: &UserId,
        collection: Collection,
    ) -> Result<mpsc::UnboundedReceiver<RemoteChange>, RemoteError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Unavailable);
        }

        // Snapshot and registration happen under one lock so no put is missed.
        let path = collection.path(user);
        let (tx, rx) = mpsc::unbounded_channel();
        for (doc_id, data) in Self::sorted_docs(&state, &path) {
            let _ = tx.send(RemoteChange {
                kind: ChangeType::Added,
                doc_id,
                data,
            });
        }
        state.listeners.entry(path).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_is_newest_first_then_live() {
        let remote = MemoryRemote::new();
        let user = UserId::new("u1");
        remote
            .put(&user, Collection::Notes, "a", json!({"text": "a"}))
            .await
            .unwrap();
        remote
            .put(&user, Collection::Notes, "b", json!({"text": "b"}))
            .await
            .unwrap();

        let mut rx = remote.subscribe(&user, Collection::Notes).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().doc_id, "b");
        assert_eq!(rx.recv().await.unwrap().doc_id, "a");

        remote
            .put(&user, Collection::Notes, "c", json!({"text": "c"}))
            .await
            .unwrap();
        let live = rx.recv().await.unwrap();
        assert_eq!(live.doc_id, "c");
        assert_eq!(live.kind, ChangeType::Added);
    }

    #[tokio::test]
    async fn repeated_put_is_a_modification_not_a_duplicate() {
        let remote = MemoryRemote::new();
        let user = UserId::new("u1");
        let mut rx = remote.subscribe(&user, Collection::Vocabulary).await.unwrap();

        for _ in 0..2 {
            remote
                .put(&user, Collection::Vocabulary, "w", json!({}))
                .await
                .unwrap();
        }
        assert_eq!(rx.recv().await.unwrap().kind, ChangeType::Added);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeType::Modified);
        assert_eq!(remote.documents(&user, Collection::Vocabulary).len(), 1);
    }

    #[tokio::test]
    async fn outages_and_rejections_fail_puts() {
        let remote = MemoryRemote::new();
        let user = UserId::new("u1");

        remote.set_offline(true);
        assert_eq!(
            remote.put(&user, Collection::Notes, "a", json!({})).await,
            Err(RemoteError::Unavailable)
        );
        remote.set_offline(false);

        remote.reject_doc("a");
        assert!(matches!(
            remote.put(&user, Collection::Notes, "a", json!({})).await,
            Err(RemoteError::Rejected(_))
        ));
        remote.clear_rejections();
        assert!(remote.put(&user, Collection::Notes, "a", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn users_do_not_see_each_other() {
        let remote = MemoryRemote::new();
        remote
            .put(&UserId::new("u1"), Collection::Notes, "a", json!({}))
            .await
            .unwrap();
        assert!(remote
            .documents(&UserId::new("u2"), Collection::Notes)
            .is_empty());
    }
}
