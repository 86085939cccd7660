use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusEvent};
use crate::config::SyncConfig;
use crate::db::{ChatTurn, Database, NoteEvent, WordEvent};
use crate::remote::{ChangeType, Collection, RemoteChange, RemoteStore, UserId};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

fn decode<T: DeserializeOwned>(change: &RemoteChange) -> Result<T> {
    serde_json::from_value(change.data.clone())
        .with_context(|| format!("malformed remote document {}", change.doc_id))
}

/// Merges one remote addition into the local store. Returns the event to
/// broadcast when the row was new locally.
pub async fn merge_remote_change(
    db: &Database,
    collection: Collection,
    change: &RemoteChange,
) -> Result<Option<BusEvent>> {
    if change.kind != ChangeType::Added {
        return Ok(None);
    }

    let event = match collection {
        Collection::Vocabulary => db
            .merge_remote_word(&change.doc_id, decode::<WordEvent>(change)?)
            .await?
            .map(BusEvent::WordAdded),
        Collection::Notes => db
            .merge_remote_note(&change.doc_id, decode::<NoteEvent>(change)?)
            .await?
            .map(BusEvent::NoteAdded),
        Collection::Chats => db
            .merge_remote_chat_turn(&change.doc_id, decode::<ChatTurn>(change)?)
            .await?
            .map(BusEvent::ChatAdded),
    };
    Ok(event)
}

/// Tails one remote collection for the signed-in user until cancelled,
/// re-opening the listener after the configured interval if it fails.
pub async fn subscribe_loop<R: RemoteStore>(
    db: Database,
    remote: Arc<R>,
    bus: Bus,
    user: UserId,
    collection: Collection,
    config: SyncConfig,
    cancel_token: CancellationToken,
) {
    loop {
        let opened = tokio::select! {
            _ = cancel_token.cancelled() => return,
            opened = remote.subscribe(&user, collection) => opened,
        };

        match opened {
            Ok(mut changes) => {
                log_info!("listening to {}", collection.path(&user));
                loop {
                    tokio::select! {
                        _ = cancel_token.cancelled() => {
                            log_info!("subscription to {} shutting down", collection.path(&user));
                            return;
                        }
                        change = changes.recv() => {
                            let Some(change) = change else {
                                log_warn!("listener for {} closed", collection.path(&user));
                                break;
                            };
                            match merge_remote_change(&db, collection, &change).await {
                                Ok(Some(event)) => bus.emit(event),
                                Ok(None) => log_debug!("remote {} {} already present", collection, change.doc_id),
                                Err(err) => log_warn!("skipping remote {} change: {err:#}", collection),
                            }
                        }
                    }
                }
            }
            Err(err) => log_warn!("subscribing to {} failed: {err}", collection.path(&user)),
        }

        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = sleep(config.retry_interval) => {}
        }
    }
}
