//! Replication between the local store and the remote store.
//!
//! Two independent loops per signed-in user: the drain loop replays the
//! local write queue, the subscribe loops tail the remote collections and
//! merge additions. They share nothing but the local store.

mod controller;
mod drain;
mod subscribe;

use std::sync::Arc;

use log::error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::config::SyncConfig;
use crate::db::Database;
use crate::remote::{AuthUser, RemoteStore};

pub use controller::SyncController;
pub use drain::{drain_once, DrainReport};
pub use subscribe::merge_remote_change;

/// Starts a sync session on every sign-in and tears it down on sign-out.
pub struct SyncEngine<R> {
    db: Database,
    remote: Arc<R>,
    bus: Bus,
    config: SyncConfig,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(db: Database, remote: Arc<R>, bus: Bus, config: SyncConfig) -> Self {
        Self {
            db,
            remote,
            bus,
            config,
        }
    }

    pub fn spawn(
        self,
        auth: watch::Receiver<Option<AuthUser>>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(auth, cancel_token))
    }

    pub async fn run(
        self,
        mut auth: watch::Receiver<Option<AuthUser>>,
        cancel_token: CancellationToken,
    ) {
        let mut controller = SyncController::new();
        let initial = auth.borrow_and_update().clone();
        self.apply(&mut controller, initial).await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                changed = auth.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let user = auth.borrow_and_update().clone();
                    self.apply(&mut controller, user).await;
                }
            }
        }

        if let Err(err) = controller.stop_sync().await {
            error!("failed to stop sync: {err:?}");
        }
    }

    async fn apply(&self, controller: &mut SyncController, user: Option<AuthUser>) {
        let wanted = user.map(|user| user.uid);
        if controller.active_user() == wanted.as_ref() {
            return;
        }

        if let Err(err) = controller.stop_sync().await {
            error!("failed to stop previous sync session: {err:?}");
        }
        if let Some(uid) = wanted {
            if let Err(err) = controller.start_sync(
                uid,
                self.db.clone(),
                self.remote.clone(),
                self.bus.clone(),
                self.config,
            ) {
                error!("failed to start sync: {err:?}");
            }
        }
    }
}
