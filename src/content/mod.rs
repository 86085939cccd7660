//! Page-side half of the extension: finds caption surfaces, turns words into
//! lookups and serves panel commands for its tab.

pub mod annotate;
pub mod detector;
mod lookup;
pub mod panels;
pub mod scanner;
pub mod tooltip;
pub mod video_id;

use log::{info, warn};
use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusError, TabCommand, TabId};
use crate::config::{DetectionConfig, SettingsRetry};
use crate::db::Database;
use crate::dom::{Page, PageEvent};

use detector::{DetectionSupervisor, DetectorContext, SurfaceHandle};
use lookup::LookupWorker;
use panels::toggle_panel;
use video_id::video_id_from_url;

/// Reads the target language, retrying while the background side comes up.
/// Falls back to `retry.fallback_language` once attempts run out.
pub async fn fetch_target_language(bus: &Bus, retry: &SettingsRetry) -> String {
    for attempt in 1..=retry.attempts {
        match bus.get_settings().await {
            Ok(settings) => return settings.target_language,
            Err(err) => {
                warn!(
                    "settings not available (attempt {attempt}/{}): {err}",
                    retry.attempts
                );
                if attempt < retry.attempts {
                    tokio::time::sleep(retry.step.saturating_mul(attempt)).await;
                }
            }
        }
    }
    info!(
        "using default target language '{}' after {} attempts",
        retry.fallback_language, retry.attempts
    );
    retry.fallback_language.to_string()
}

pub struct ContentScript {
    page: Page,
    bus: Bus,
    db: Database,
    detection: DetectionConfig,
    settings_retry: SettingsRetry,
}

impl ContentScript {
    pub fn new(page: Page, bus: Bus, db: Database) -> Self {
        Self {
            page,
            bus,
            db,
            detection: DetectionConfig::default(),
            settings_retry: SettingsRetry::default(),
        }
    }

    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_settings_retry(mut self, settings_retry: SettingsRetry) -> Self {
        self.settings_retry = settings_retry;
        self
    }

    /// Registers the tab, waits for settings, then starts detection, the
    /// lookup worker and the tab command loop.
    pub async fn start(self, cancel_token: CancellationToken) -> Result<ContentHandle, BusError> {
        let (tab_id, commands) = self.bus.attach_tab(self.page.url().as_str()).await?;
        info!("content script attached to {tab_id} ({})", self.page.url());

        let language = fetch_target_language(&self.bus, &self.settings_retry).await;
        info!("target language for {tab_id}: {language}");

        let (lookups_tx, lookups_rx) = mpsc::unbounded_channel();
        let ctx = DetectorContext::new(self.page.clone(), lookups_tx, self.detection);
        let supervisor = DetectionSupervisor::spawn(ctx, cancel_token.child_token());

        let worker = LookupWorker {
            page: self.page.clone(),
            bus: self.bus.clone(),
            db: self.db.clone(),
            fallback_language: language,
            tooltip_lifetime: self.detection.tooltip_lifetime,
        };
        let lookup_task = tokio::spawn(worker.run(lookups_rx, cancel_token.clone()));

        let tab_task = tokio::spawn(serve_tab(
            self.page.clone(),
            self.bus.clone(),
            tab_id,
            commands,
            cancel_token.clone(),
        ));

        Ok(ContentHandle {
            tab_id,
            bus: self.bus,
            cancel_token,
            surface: supervisor.surface,
            tasks: vec![supervisor.task, lookup_task, tab_task],
        })
    }
}

/// Answers commands for one tab until the page unloads or is cancelled.
async fn serve_tab(
    page: Page,
    bus: Bus,
    tab_id: TabId,
    mut commands: mpsc::UnboundedReceiver<TabCommand>,
    cancel_token: CancellationToken,
) {
    let mut events = page.subscribe();
    let video_id = video_id_from_url(page.url());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            command = commands.recv() => match command {
                Some(TabCommand::TogglePanel { panel, reply }) => {
                    let open = page.with_dom(|doc| toggle_panel(doc, panel, &video_id));
                    let open = match open {
                        Ok(open) => open,
                        Err(err) => {
                            warn!("failed to toggle {} panel: {err}", panel.as_str());
                            false
                        }
                    };
                    let _ = reply.send(open);
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(PageEvent::BeforeUnload) | Err(RecvError::Closed) => {
                    info!("{tab_id} unloading");
                    cancel_token.cancel();
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
        }
    }

    bus.detach_tab(tab_id);
}

/// A running content script.
pub struct ContentHandle {
    tab_id: TabId,
    bus: Bus,
    cancel_token: CancellationToken,
    surface: watch::Receiver<Option<SurfaceHandle>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ContentHandle {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        *self.surface.borrow()
    }

    /// Resolves once detection has installed a surface, or `None` if the
    /// script stopped first.
    pub async fn wait_for_surface(&mut self) -> Option<SurfaceHandle> {
        loop {
            if let Some(handle) = *self.surface.borrow_and_update() {
                return Some(handle);
            }
            if self.surface.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn activate(&self) {
        self.bus.activate_tab(self.tab_id);
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("content task ended abnormally: {err}");
            }
        }
        self.bus.detach_tab(self.tab_id);
    }
}
