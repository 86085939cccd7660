use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusEvent};
use crate::config::SyncConfig;
use crate::db::{ChangeKind, Database, Table, TableChange};
use crate::remote::{RemoteStore, UserId};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

/// Replays every pending queue item, oldest first. A failed item is counted
/// and kept for the next cycle; later items are still attempted.
pub async fn drain_once<R: RemoteStore>(
    db: &Database,
    remote: &R,
    user: &UserId,
) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for item in db.pending_queue().await? {
        let Some(doc_id) = item.doc_id().map(str::to_string) else {
            log_warn!("queue item {} has no uid; leaving it queued", item.id);
            db.mark_queue_failure(item.id, "payload has no uid").await?;
            report.failed += 1;
            continue;
        };

        let collection = item.kind.collection();
        match remote
            .put(user, collection, &doc_id, item.payload.clone())
            .await
        {
            Ok(()) => {
                db.delete_queue_item(item.id).await?;
                report.delivered += 1;
            }
            Err(err) => {
                log_warn!(
                    "delivering {} {} to {} failed (attempt {}): {err}",
                    item.kind.as_str(),
                    doc_id,
                    collection,
                    item.attempts + 1
                );
                db.mark_queue_failure(item.id, &err.to_string()).await?;
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

fn is_new_queue_item(change: &TableChange) -> bool {
    change.table == Table::Queue && change.kind == ChangeKind::Inserted
}

fn next_retry(config: &SyncConfig) -> Duration {
    let jitter_ms = u64::try_from(config.retry_jitter.as_millis()).unwrap_or(0);
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    config.retry_interval + Duration::from_millis(jitter)
}

/// Drains on start, whenever a new item is queued and on the retry interval,
/// until cancelled.
pub async fn drain_loop<R: RemoteStore>(
    db: Database,
    remote: Arc<R>,
    bus: Bus,
    user: UserId,
    config: SyncConfig,
    cancel_token: CancellationToken,
) {
    let mut changes = db.subscribe();

    loop {
        match drain_once(&db, remote.as_ref(), &user).await {
            Ok(report) if !report.is_empty() => {
                log_info!(
                    "queue drain for {user}: {} delivered, {} failed",
                    report.delivered,
                    report.failed
                );
                bus.emit(BusEvent::QueueDrained {
                    delivered: report.delivered,
                    failed: report.failed,
                });
            }
            Ok(_) => {}
            Err(err) => log_error!("queue drain for {user} failed: {err:?}"),
        }

        let retry = sleep(next_retry(&config));
        tokio::pin!(retry);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    log_info!("drain loop for {user} shutting down");
                    return;
                }
                _ = &mut retry => break,
                change = changes.recv() => match change {
                    Ok(change) if is_new_queue_item(&change) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => {
                        log_warn!("store change feed closed; drain loop for {user} stopping");
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueueKind;
    use crate::remote::{Collection, MemoryRemote};
    use serde_json::json;

    fn temp_database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("learnflow.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn successful_drain_deletes_in_order() {
        let (_dir, db) = temp_database();
        let remote = MemoryRemote::new();
        let user = UserId::new("u1");
        for uid in ["a", "b", "c"] {
            db.enqueue(QueueKind::SaveNote, json!({"uid": uid, "text": uid}))
                .await
                .unwrap();
        }

        let report = drain_once(&db, &remote, &user).await.unwrap();
        assert_eq!(report, DrainReport { delivered: 3, failed: 0 });
        assert_eq!(db.queue_len().await.unwrap(), 0);

        // The remote saw them in queue order: newest-first listing is c, b, a.
        let ids: Vec<String> = remote
            .documents(&user, Collection::Notes)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn failed_item_is_retained_and_later_items_still_go_out() {
        let (_dir, db) = temp_database();
        let remote = MemoryRemote::new();
        let user = UserId::new("u1");
        for uid in ["a", "b", "c"] {
            db.enqueue(QueueKind::SaveWord, json!({"uid": uid}))
                .await
                .unwrap();
        }
        remote.reject_doc("b");

        let report = drain_once(&db, &remote, &user).await.unwrap();
        assert_eq!(report, DrainReport { delivered: 2, failed: 1 });

        let pending = db.pending_queue().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].doc_id(), Some("b"));
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());

        remote.clear_rejections();
        let report = drain_once(&db, &remote, &user).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_remote_keeps_everything_queued() {
        let (_dir, db) = temp_database();
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        db.enqueue(QueueKind::SaveChat, json!({"uid": "a"}))
            .await
            .unwrap();

        let report = drain_once(&db, &remote, &UserId::new("u1")).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(db.queue_len().await.unwrap(), 1);
    }

    #[test]
    fn retry_delay_stays_within_jitter() {
        let config = SyncConfig::default();
        for _ in 0..20 {
            let delay = next_retry(&config);
            assert!(delay >= config.retry_interval);
            assert!(delay <= config.retry_interval + config.retry_jitter);
        }
    }
}
