pub mod assistant;
pub mod auth;
pub mod background;
pub mod bus;
pub mod config;
pub mod content;
pub mod db;
pub mod dom;
pub mod remote;
pub mod settings;
pub mod study;
pub mod sync;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use assistant::{AssistantClient, CallableAssistant, UnconfiguredAssistant};
use auth::AuthHandle;
use background::BackgroundService;
use bus::{Bus, BusError};
use config::RuntimeConfig;
use content::{ContentHandle, ContentScript};
use db::Database;
use dom::Page;
use remote::{MemoryRemote, RemoteStore};
use settings::SettingsStore;
use study::{ChatSession, Notebook, Summarizer, Vocabulary};
use sync::SyncEngine;

/// Everything one running instance owns: the local store, the bus and the
/// background and sync loops serving it.
pub struct App<R> {
    pub db: Database,
    pub bus: Bus,
    pub auth: AuthHandle,
    pub settings: Arc<SettingsStore>,
    pub remote: Arc<R>,
    config: RuntimeConfig,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: RemoteStore> App<R> {
    pub fn start<A: AssistantClient>(
        config: RuntimeConfig,
        assistant: Arc<A>,
        remote: Arc<R>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;

        let db = Database::new(config.database_path())?;
        let settings = Arc::new(SettingsStore::new(config.settings_path())?);
        let auth = AuthHandle::new();
        let (bus, inbox) = Bus::new();
        let cancel_token = CancellationToken::new();

        let background = BackgroundService::new(bus.clone(), settings.clone(), assistant, auth.clone())
            .spawn(inbox, cancel_token.child_token());
        let sync = SyncEngine::new(db.clone(), remote.clone(), bus.clone(), config.sync_config())
            .spawn(auth.watch(), cancel_token.child_token());

        Ok(Self {
            db,
            bus,
            auth,
            settings,
            remote,
            config,
            cancel_token,
            tasks: vec![background, sync],
        })
    }

    /// Starts a content script for `page` as the active tab.
    pub async fn open_page(&self, page: Page) -> Result<ContentHandle, BusError> {
        ContentScript::new(page, self.bus.clone(), self.db.clone())
            .start(self.cancel_token.child_token())
            .await
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn chat(&self) -> ChatSession {
        ChatSession::new(self.db.clone(), self.bus.clone())
    }

    pub fn notes(&self) -> Notebook {
        Notebook::new(self.db.clone(), self.bus.clone())
    }

    pub fn summarizer(&self) -> Summarizer {
        Summarizer::new(self.db.clone(), self.bus.clone())
    }

    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::new(self.db.clone())
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("background task ended abnormally: {err}");
            }
        }
        info!("LearnFlow stopped");
    }
}

/// Process entry point: wires the stores and loops from the environment and
/// runs until interrupted.
pub async fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("LearnFlow starting up...");

    let config = RuntimeConfig::from_env();
    // The hosted database binding lives outside this crate; loop back into an
    // in-process store.
    let remote = Arc::new(MemoryRemote::new());

    let app = match config.functions_url.clone() {
        Some(url) => {
            info!("assistant calls go to {url}");
            App::start(config, Arc::new(CallableAssistant::new(url)), remote)?
        }
        None => {
            warn!("LEARNFLOW_FUNCTIONS_URL not set; translation, chat and summaries are disabled");
            App::start(config, Arc::new(UnconfiguredAssistant), remote)?
        }
    };
    info!("local store at {}", app.db.path().display());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    app.shutdown().await;
    Ok(())
}
