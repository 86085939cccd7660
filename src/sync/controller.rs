use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::config::SyncConfig;
use crate::db::Database;
use crate::remote::{Collection, RemoteStore, UserId};

use super::drain::drain_loop;
use super::subscribe::subscribe_loop;

/// Owns the drain loop and the per-collection subscribe loops of one
/// signed-in session.
pub struct SyncController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    user: Option<UserId>,
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncController {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            cancel_token: None,
            user: None,
        }
    }

    pub fn active_user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn start_sync<R: RemoteStore>(
        &mut self,
        user: UserId,
        db: Database,
        remote: Arc<R>,
        bus: Bus,
        config: SyncConfig,
    ) -> Result<()> {
        if self.cancel_token.is_some() {
            bail!("sync already active");
        }

        info!("starting sync for {user}");
        let cancel_token = CancellationToken::new();

        self.handles.push(tokio::spawn(drain_loop(
            db.clone(),
            remote.clone(),
            bus.clone(),
            user.clone(),
            config,
            cancel_token.clone(),
        )));
        for collection in Collection::ALL {
            self.handles.push(tokio::spawn(subscribe_loop(
                db.clone(),
                remote.clone(),
                bus.clone(),
                user.clone(),
                collection,
                config,
                cancel_token.clone(),
            )));
        }

        self.cancel_token = Some(cancel_token);
        self.user = Some(user);
        Ok(())
    }

    pub async fn stop_sync(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(user) = self.user.take() {
            info!("stopping sync for {user}");
        }

        for handle in self.handles.drain(..) {
            handle.await.context("sync task failed to join")?;
        }
        Ok(())
    }
}
