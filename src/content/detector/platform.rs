use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::content::annotate::{unwrap_tokens, wrap_text_children, wrap_text_node};
use crate::dom::{
    DomError, Document, MutationKind, MutationRecord, NodeId, ObserveOptions, ObserverId, Page,
    Selector,
};
use crate::{log_debug, log_warn};

use super::{spawn_token_clicks, DetectorContext, DetectorVariant, SurfaceHandle, SurfaceMode};

const ENABLE_LOGS: bool = false;

/// Known caption containers in priority order.
fn container_selectors() -> [Selector; 6] {
    [
        Selector::Class("ytp-caption-window-container"),
        Selector::TagClass("div", "caption-window"),
        Selector::TagClass("yt-formatted-string", "ytp-caption-segment"),
        Selector::Class("ytp-player-caption-spoken-text"),
        Selector::Class("caption-window-rolling"),
        Selector::Class("ytp-caption-segment-container"),
    ]
}

fn segment_selector() -> Selector {
    Selector::any_of([
        Selector::Class("ytp-caption-segment"),
        Selector::Class("caption-visual-line"),
    ])
}

/// First caption container found, trying selectors in priority order.
pub fn find_caption_container(doc: &Document) -> Option<NodeId> {
    container_selectors()
        .iter()
        .find_map(|selector| doc.find(selector))
}

#[derive(Default)]
struct Observed {
    container: Option<NodeId>,
    observer: Option<ObserverId>,
}

/// Watches the platform player's caption container and wraps caption words
/// in place as the player writes them.
pub struct PlatformDetector {
    ctx: DetectorContext,
    cancel_token: Option<CancellationToken>,
    observed: Arc<Mutex<Observed>>,
}

impl PlatformDetector {
    pub fn new(ctx: DetectorContext) -> Self {
        Self {
            ctx,
            cancel_token: None,
            observed: Arc::new(Mutex::new(Observed::default())),
        }
    }

    /// Reports the caption container when it is already on the page.
    /// Otherwise returns `None` and keeps polling; once a container shows up
    /// the supervisor is pinged through `redetect`.
    pub fn detect(&mut self) -> Option<SurfaceHandle> {
        self.cleanup();
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());
        let page = self.ctx.page.clone();

        let found = page.with_dom(|doc| {
            let container = find_caption_container(doc)?;
            let mut observed = lock(&self.observed);
            match start_observing(doc, &mut observed, container) {
                Ok(records) => Some((container, Some(records))),
                Err(err) => {
                    log_warn!("[platform] failed to wrap existing captions: {err}");
                    Some((container, None))
                }
            }
        });

        let Some((container, records)) = found else {
            log_debug!("[platform] no caption container yet, polling");
            tokio::spawn(poll_for_container(
                page,
                Arc::clone(&self.ctx.redetect),
                self.ctx.config.poll_interval,
                cancel_token,
            ));
            return None;
        };

        log_debug!("[platform] caption container present, observing");
        if let Some(records) = records {
            tokio::spawn(wrap_mutations(page.clone(), records, cancel_token.clone()));
        }

        let observed = Arc::clone(&self.observed);
        spawn_token_clicks(
            page,
            self.ctx.lookups.clone(),
            DetectorVariant::Platform.source(),
            move || lock(&observed).container,
            cancel_token,
        );

        Some(SurfaceHandle {
            variant: DetectorVariant::Platform,
            element: container,
            mode: SurfaceMode::LiveCaptions,
        })
    }

    /// Stops polling and observation and puts plain text back. Safe to call
    /// repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }

        self.ctx.page.with_dom(|doc| {
            let mut observed = lock(&self.observed);
            if let Some(observer) = observed.observer.take() {
                doc.disconnect(observer);
            }
            if let Some(container) = observed.container.take() {
                if doc.is_connected(container) {
                    match unwrap_tokens(doc, container) {
                        Ok(count) => log_debug!("[platform] restored {count} tokens"),
                        Err(err) => log_warn!("[platform] failed to restore captions: {err}"),
                    }
                }
            }
        });
    }
}

impl Drop for PlatformDetector {
    fn drop(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }
    }
}

fn lock(observed: &Mutex<Observed>) -> MutexGuard<'_, Observed> {
    match observed.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Registers the observer, then wraps the captions already on screen.
fn start_observing(
    doc: &mut Document,
    observed: &mut Observed,
    container: NodeId,
) -> Result<mpsc::UnboundedReceiver<MutationRecord>, DomError> {
    let (observer, records) = doc.observe(container, ObserveOptions::subtree_text());
    observed.container = Some(container);
    observed.observer = Some(observer);

    for segment in doc.query_selector_all(container, &segment_selector()) {
        wrap_text_children(doc, segment)?;
    }
    Ok(records)
}

/// Polls until a caption container exists, then asks for a new detection.
async fn poll_for_container(
    page: Page,
    redetect: Arc<Notify>,
    interval: std::time::Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if page.with_dom(|doc| find_caption_container(doc).is_some()) {
            log_debug!("[platform] caption container appeared");
            redetect.notify_one();
            return;
        }
    }
}

async fn wrap_mutations(
    page: Page,
    mut records: mpsc::UnboundedReceiver<MutationRecord>,
    cancel_token: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            _ = cancel_token.cancelled() => return,
            record = records.recv() => record,
        };
        let Some(record) = record else {
            return;
        };

        page.with_dom(|doc| {
            if cancel_token.is_cancelled() {
                return;
            }
            if let Err(err) = apply_mutation(doc, &record) {
                log_warn!("[platform] skipped caption mutation: {err}");
            }
        });
    }
}

/// Wraps whatever caption text one mutation introduced.
fn apply_mutation(doc: &mut Document, record: &MutationRecord) -> Result<usize, DomError> {
    match &record.kind {
        MutationKind::CharacterData => {
            let has_text = doc
                .text(record.target)
                .is_some_and(|text| !text.trim().is_empty());
            if has_text {
                Ok(wrap_text_node(doc, record.target)?.len())
            } else {
                Ok(0)
            }
        }
        MutationKind::ChildList { added, .. } => {
            let segments = segment_selector();
            let mut wrapped = 0;
            for node in added {
                if !doc.is_connected(*node) {
                    continue;
                }
                if doc.is_text(*node) {
                    wrapped += wrap_text_node(doc, *node)?.len();
                } else if doc.element(*node).is_some_and(|el| segments.matches(el)) {
                    wrapped += wrap_text_children(doc, *node)?;
                }
            }
            Ok(wrapped)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DetectionConfig;
    use crate::content::annotate::TOKEN_CLASS;
    use crate::content::detector::LookupRequest;
    use crate::dom::{PageEvent, Point};

    fn context(page: &Page) -> (DetectorContext, mpsc::UnboundedReceiver<LookupRequest>) {
        let (lookups, rx) = mpsc::unbounded_channel();
        (
            DetectorContext::new(page.clone(), lookups, DetectionConfig::default()),
            rx,
        )
    }

    /// `div.caption-window > span.ytp-caption-segment > "text"`
    fn caption_window(doc: &mut Document, text: &str) -> (NodeId, NodeId) {
        let container = doc.create_element_with_class("div", "caption-window");
        let segment = doc.create_element_with_class("span", "ytp-caption-segment");
        let text = doc.create_text(text);
        doc.append_child(segment, text).unwrap();
        doc.append_child(container, segment).unwrap();
        let body = doc.body();
        doc.append_child(body, container).unwrap();
        (container, segment)
    }

    fn token_words(doc: &Document, scope: NodeId) -> Vec<String> {
        doc.query_selector_all(scope, &Selector::Class(TOKEN_CLASS))
            .into_iter()
            .map(|token| doc.text_content(token))
            .collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn container_selectors_are_tried_in_order() {
        let mut doc = Document::new();
        let body = doc.body();
        let rolling = doc.create_element_with_class("div", "caption-window-rolling");
        doc.append_child(body, rolling).unwrap();
        let window = doc.create_element_with_class("div", "caption-window");
        doc.append_child(body, window).unwrap();

        assert_eq!(find_caption_container(&doc), Some(window));
    }

    #[tokio::test]
    async fn existing_captions_are_wrapped_and_restored() {
        let page = Page::new("https://www.youtube.com/watch?v=abc", "Lesson").unwrap();
        let (container, segment) = page.with_dom(|doc| caption_window(doc, "bonjour tout le monde"));
        let (ctx, _lookups) = context(&page);
        let mut detector = PlatformDetector::new(ctx);

        let handle = detector.detect().unwrap();
        assert_eq!(handle.element, container);
        assert_eq!(handle.mode, SurfaceMode::LiveCaptions);
        page.with_dom(|doc| {
            assert_eq!(
                token_words(doc, container),
                vec!["bonjour", "tout", "le", "monde"]
            );
            assert_eq!(doc.text_content(segment), "bonjour tout le monde");
        });

        detector.cleanup();
        detector.cleanup();
        page.with_dom(|doc| {
            assert!(token_words(doc, container).is_empty());
            assert_eq!(doc.text_content(segment), "bonjour tout le monde");
            assert_eq!(doc.active_observer_count(), 0);
        });
    }

    #[tokio::test]
    async fn new_caption_text_is_wrapped_as_it_arrives() {
        let page = Page::new("https://www.youtube.com/watch?v=abc", "").unwrap();
        let (container, _) = page.with_dom(|doc| caption_window(doc, "hola"));
        let (ctx, _lookups) = context(&page);
        let mut detector = PlatformDetector::new(ctx);
        detector.detect().unwrap();

        page.with_dom(|doc| {
            let segment = doc.create_element_with_class("span", "ytp-caption-segment");
            let text = doc.create_text("buenos dias");
            doc.append_child(segment, text).unwrap();
            doc.append_child(container, segment).unwrap();
        });
        settle().await;

        page.with_dom(|doc| {
            assert_eq!(token_words(doc, container), vec!["hola", "buenos", "dias"]);
        });
        detector.cleanup();
    }

    #[tokio::test]
    async fn missing_container_reports_no_surface_until_polling_finds_one() {
        let page = Page::new("https://www.youtube.com/watch?v=abc", "").unwrap();
        let (lookups, _rx) = mpsc::unbounded_channel();
        let config = DetectionConfig {
            poll_interval: Duration::from_millis(10),
            ..DetectionConfig::default()
        };
        let ctx = DetectorContext::new(page.clone(), lookups, config);
        let redetect = Arc::clone(&ctx.redetect);
        let mut detector = PlatformDetector::new(ctx);

        assert!(detector.detect().is_none());

        let (container, _) = page.with_dom(|doc| caption_window(doc, "guten tag"));
        tokio::time::timeout(Duration::from_secs(1), redetect.notified())
            .await
            .unwrap();

        let handle = detector.detect().unwrap();
        assert_eq!(handle.element, container);
        page.with_dom(|doc| assert_eq!(token_words(doc, container), vec!["guten", "tag"]));
        detector.cleanup();
    }

    #[tokio::test]
    async fn clicking_a_token_requests_a_lookup() {
        let page = Page::new("https://www.youtube.com/watch?v=abc", "").unwrap();
        let (container, _) = page.with_dom(|doc| caption_window(doc, "bonjour"));
        let (ctx, mut lookups) = context(&page);
        let mut detector = PlatformDetector::new(ctx);
        detector.detect().unwrap();

        let token = page.with_dom(|doc| doc.query_selector(container, &Selector::Class(TOKEN_CLASS)).unwrap());
        page.dispatch(PageEvent::Click {
            target: token,
            position: Point::new(5.0, 6.0),
        });

        let request = lookups.recv().await.unwrap();
        assert_eq!(request.text, "bonjour");
        assert_eq!(request.source, "youtube");
        assert_eq!(request.position, Point::new(5.0, 6.0));
        detector.cleanup();
    }
}
