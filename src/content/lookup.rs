use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusEvent};
use crate::db::{Database, WordContext, WordEvent};
use crate::dom::Page;

use super::detector::LookupRequest;
use super::tooltip::show_tooltip;

/// Resolves lookups from the page's detectors: translate, show the result,
/// keep the word.
pub(crate) struct LookupWorker {
    pub page: Page,
    pub bus: Bus,
    pub db: Database,
    /// Used when settings cannot be read at lookup time.
    pub fallback_language: String,
    pub tooltip_lifetime: Duration,
}

impl LookupWorker {
    /// Each lookup runs on its own task; results may land out of order.
    pub async fn run(
        self,
        mut lookups: mpsc::UnboundedReceiver<LookupRequest>,
        cancel_token: CancellationToken,
    ) {
        let worker = Arc::new(self);
        loop {
            let request = tokio::select! {
                _ = cancel_token.cancelled() => break,
                request = lookups.recv() => request,
            };
            let Some(request) = request else {
                break;
            };
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.handle(request).await });
        }
        debug!("lookup worker stopped");
    }

    async fn target_language(&self) -> String {
        match self.bus.get_settings().await {
            Ok(settings) => settings.target_language,
            Err(err) => {
                warn!("settings unavailable for lookup, using {}: {err}", self.fallback_language);
                self.fallback_language.clone()
            }
        }
    }

    pub async fn handle(&self, request: LookupRequest) {
        let target_language = self.target_language().await;

        let translation = match self.bus.translate(&request.text, &target_language).await {
            Ok(translation) => translation,
            Err(err) => {
                warn!("lookup for '{}' failed: {err}", request.text);
                if let Err(err) = show_tooltip(
                    &self.page,
                    request.position,
                    &request.text,
                    &err.user_message(),
                    self.tooltip_lifetime,
                ) {
                    warn!("failed to show error tooltip: {err}");
                }
                return;
            }
        };

        if let Err(err) = show_tooltip(
            &self.page,
            request.position,
            &request.text,
            &translation.translated_text,
            self.tooltip_lifetime,
        ) {
            warn!("failed to show translation tooltip: {err}");
        }

        let source_language = if translation.detected_source_language.is_empty() {
            "auto".to_string()
        } else {
            translation.detected_source_language
        };
        let video_title = (request.source == "youtube").then(|| self.page.title().to_string());
        let event = WordEvent {
            original_word: request.text,
            target_word: translation.translated_text,
            source_language,
            target_language,
            timestamp: Utc::now(),
            context: WordContext {
                source: request.source.to_string(),
                url: self.page.url().to_string(),
                video_title,
            },
        };

        match self.db.record_word(event).await {
            Ok(row) => self.bus.emit(BusEvent::WordAdded(row)),
            Err(err) => error!("failed to save looked-up word: {err:?}"),
        }
    }
}
