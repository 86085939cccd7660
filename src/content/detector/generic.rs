use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, Notify,
};
use tokio_util::sync::CancellationToken;

use crate::content::annotate::{annotate, is_lookup_selection};
use crate::content::scanner::{CaptionLine, CueSource, SubtitleScanner};
use crate::dom::{
    Document, MutationKind, MutationRecord, NodeId, ObserveOptions, ObserverId, Page, PageEvent,
    Selector, TrackKind,
};
use crate::{log_debug, log_info, log_warn};

use super::{
    spawn_token_clicks, DetectorContext, DetectorVariant, LookupRequest, SurfaceHandle,
    SurfaceMode,
};

const ENABLE_LOGS: bool = false;

/// Container the generic detector renders cue tokens into.
pub const OVERLAY_CLASS: &str = "learnflow-cue-overlay";

/// Caption-styled containers some players render next to the video.
fn caption_container_selector() -> Selector {
    Selector::any_of([
        Selector::Class("captions-text"),
        Selector::Class("vjs-text-track-display"),
        Selector::Class("mejs__captions-text"),
        Selector::Class("caption-text"),
        Selector::ClassContains("caption"),
        Selector::ClassContains("subtitle"),
    ])
}

/// The first video exposing spoken text, and where to read it from.
///
/// Per video: `<track>` children first, then tracks added from script, then
/// a caption-styled element beside the video.
pub fn find_video_with_track(doc: &Document) -> Option<(NodeId, CueSource)> {
    let videos = doc.query_selector_all(doc.document_element(), &Selector::Tag("video"));
    for video in videos {
        let element_track = doc.children(video).iter().find_map(|child| {
            let el = doc.element(*child)?;
            if !el.tag.eq_ignore_ascii_case("track") {
                return None;
            }
            let kind = el.attr("kind").and_then(TrackKind::parse)?;
            if !kind.is_spoken_text() {
                return None;
            }
            doc.element_track(*child)
        });
        if let Some(track) = element_track {
            return Some((video, CueSource::Track(track)));
        }

        let listed = doc
            .text_tracks(video)
            .into_iter()
            .find(|track| doc.track(*track).is_some_and(|t| t.kind.is_spoken_text()));
        if let Some(track) = listed {
            return Some((video, CueSource::Track(track)));
        }

        let beside = doc
            .parent(video)
            .and_then(|parent| doc.query_selector(parent, &caption_container_selector()))
            .filter(|container| *container != video);
        if let Some(container) = beside {
            return Some((video, CueSource::Container(container)));
        }
    }
    None
}

#[derive(Default)]
struct GenericInner {
    scanner: Option<SubtitleScanner>,
    overlay: Option<NodeId>,
    video_observer: Option<ObserverId>,
}

/// Detector for pages that play video through a plain `<video>` element.
pub struct GenericDetector {
    ctx: DetectorContext,
    cancel_token: Option<CancellationToken>,
    inner: Arc<Mutex<GenericInner>>,
}

impl GenericDetector {
    pub fn new(ctx: DetectorContext) -> Self {
        Self {
            ctx,
            cancel_token: None,
            inner: Arc::new(Mutex::new(GenericInner::default())),
        }
    }

    pub fn detect(&mut self) -> Option<SurfaceHandle> {
        self.cleanup();
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());

        let page = self.ctx.page.clone();
        let mut doc = page.dom();
        let mut inner = lock(&self.inner);

        if let Some((video, source)) = find_video_with_track(&doc) {
            match self.start_cue_surface(&mut doc, &mut inner, video, source, &cancel_token) {
                Ok(handle) => return Some(handle),
                Err(err) => {
                    log_warn!("[generic] failed to start cue surface: {err:#}");
                    cancel_token.cancel();
                    return None;
                }
            }
        }

        let root = doc.document_element();
        let (observer, records) = doc.observe(root, ObserveOptions::subtree_children());
        inner.video_observer = Some(observer);
        tokio::spawn(watch_for_videos(
            page.clone(),
            records,
            Arc::clone(&self.ctx.redetect),
            cancel_token.clone(),
        ));

        let video = doc.find(&Selector::Tag("video"))?;
        log_info!("[generic] video without captions, falling back to selection lookups");
        tokio::spawn(selection_lookups(
            page.clone(),
            page.subscribe(),
            self.ctx.lookups.clone(),
            self.ctx.config.selection_debounce,
            cancel_token,
        ));
        Some(SurfaceHandle {
            variant: DetectorVariant::Generic,
            element: video,
            mode: SurfaceMode::Selection,
        })
    }

    fn start_cue_surface(
        &self,
        doc: &mut Document,
        inner: &mut GenericInner,
        video: NodeId,
        source: CueSource,
        cancel_token: &CancellationToken,
    ) -> Result<SurfaceHandle> {
        let overlay = doc.create_element_with_class("div", OVERLAY_CLASS);
        let host = doc.parent(video).unwrap_or_else(|| doc.body());
        doc.append_child(host, overlay)
            .context("failed to place cue overlay")?;
        inner.overlay = Some(overlay);

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let scanner = SubtitleScanner::attach(
            doc,
            &self.ctx.page,
            source,
            lines_tx,
            cancel_token.child_token(),
        )
        .context("failed to attach subtitle scanner")?;
        inner.scanner = Some(scanner);
        log_debug!("[generic] scanning {source:?} for video {video:?}");

        tokio::spawn(render_lines(
            self.ctx.page.clone(),
            overlay,
            lines_rx,
            cancel_token.clone(),
        ));

        let inner_ref = Arc::clone(&self.inner);
        spawn_token_clicks(
            self.ctx.page.clone(),
            self.ctx.lookups.clone(),
            DetectorVariant::Generic.source(),
            move || lock(&inner_ref).overlay,
            cancel_token.clone(),
        );

        Ok(SurfaceHandle {
            variant: DetectorVariant::Generic,
            element: overlay,
            mode: SurfaceMode::CueTrack,
        })
    }

    /// Tears down the scanner, the overlay and any observers. Safe to call
    /// repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }

        self.ctx.page.with_dom(|doc| {
            let mut inner = lock(&self.inner);
            if let Some(mut scanner) = inner.scanner.take() {
                scanner.disconnect(doc);
            }
            if let Some(observer) = inner.video_observer.take() {
                doc.disconnect(observer);
            }
            if let Some(overlay) = inner.overlay.take() {
                if doc.is_connected(overlay) {
                    if let Err(err) = doc.remove(overlay) {
                        log_warn!("[generic] failed to remove overlay: {err}");
                    }
                }
            }
        });
    }
}

impl Drop for GenericDetector {
    fn drop(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }
    }
}

fn lock(inner: &Mutex<GenericInner>) -> MutexGuard<'_, GenericInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn render_lines(
    page: Page,
    overlay: NodeId,
    mut lines: mpsc::UnboundedReceiver<CaptionLine>,
    cancel_token: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel_token.cancelled() => return,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            return;
        };

        page.with_dom(|doc| {
            if cancel_token.is_cancelled() || !doc.is_connected(overlay) {
                return;
            }
            if let Err(err) = annotate(doc, overlay, &line.text) {
                log_warn!("[generic] failed to render cue: {err}");
            }
        });
    }
}

fn adds_video_or_track(doc: &Document, record: &MutationRecord) -> bool {
    let MutationKind::ChildList { added, .. } = &record.kind else {
        return false;
    };
    let media = Selector::any_of([Selector::Tag("video"), Selector::Tag("track")]);
    added.iter().any(|node| {
        doc.element(*node).is_some_and(|el| media.matches(el))
            || doc.query_selector(*node, &media).is_some()
    })
}

async fn watch_for_videos(
    page: Page,
    mut records: mpsc::UnboundedReceiver<MutationRecord>,
    redetect: Arc<Notify>,
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

        if page.with_dom(|doc| adds_video_or_track(doc, &record)) {
            log_debug!("[generic] video or track added, asking for a new detection");
            redetect.notify_one();
        }
    }
}

/// Short selections released over the page become lookups once they have
/// held still for `debounce`.
async fn selection_lookups(
    page: Page,
    mut events: broadcast::Receiver<PageEvent>,
    lookups: mpsc::UnboundedSender<LookupRequest>,
    debounce: Duration,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => return,
            event = events.recv() => event,
        };

        let position = match event {
            Ok(PageEvent::MouseUp { position }) => position,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        };

        let selected = page.dom().selection_text().to_string();
        if !is_lookup_selection(&selected) {
            continue;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = tokio::time::sleep(debounce) => {}
        }

        let still_selected = page.dom().selection_text().to_string();
        if still_selected != selected {
            log_debug!("[generic] selection changed during debounce, ignoring");
            continue;
        }

        let request = LookupRequest {
            text: selected,
            position,
            source: DetectorVariant::Generic.source(),
        };
        if lookups.send(request).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::content::annotate::TOKEN_CLASS;
    use crate::dom::{Point, TrackMode};

    fn context(page: &Page) -> (DetectorContext, mpsc::UnboundedReceiver<LookupRequest>) {
        let (lookups, rx) = mpsc::unbounded_channel();
        (
            DetectorContext::new(page.clone(), lookups, DetectionConfig::default()),
            rx,
        )
    }

    fn player(doc: &mut Document) -> (NodeId, NodeId) {
        let wrapper = doc.create_element_with_class("div", "player");
        let video = doc.create_element("video");
        doc.append_child(wrapper, video).unwrap();
        let body = doc.body();
        doc.append_child(body, wrapper).unwrap();
        (wrapper, video)
    }

    fn overlay_words(doc: &Document, overlay: NodeId) -> Vec<String> {
        doc.query_selector_all(overlay, &Selector::Class(TOKEN_CLASS))
            .into_iter()
            .map(|token| doc.text_content(token))
            .collect()
    }

    #[test]
    fn track_children_win_over_listed_tracks() {
        let mut doc = Document::new();
        let (_, video) = player(&mut doc);
        let listed = doc.add_text_track(video, TrackKind::Subtitles);
        let track_el = doc.create_element("track");
        doc.append_child(video, track_el).unwrap();
        let from_element = doc.attach_track_element(track_el, TrackKind::Captions).unwrap();

        assert_ne!(listed, from_element);
        assert_eq!(
            find_video_with_track(&doc),
            Some((video, CueSource::Track(from_element)))
        );
    }

    #[test]
    fn metadata_tracks_are_not_captions() {
        let mut doc = Document::new();
        let (_, video) = player(&mut doc);
        doc.add_text_track(video, TrackKind::Metadata);
        assert_eq!(find_video_with_track(&doc), None);

        let subtitles = doc.add_text_track(video, TrackKind::Subtitles);
        assert_eq!(
            find_video_with_track(&doc),
            Some((video, CueSource::Track(subtitles)))
        );
    }

    #[test]
    fn caption_styled_sibling_is_a_fallback_source() {
        let mut doc = Document::new();
        let (wrapper, video) = player(&mut doc);
        let captions = doc.create_element_with_class("div", "vjs-text-track-display");
        doc.append_child(wrapper, captions).unwrap();

        assert_eq!(
            find_video_with_track(&doc),
            Some((video, CueSource::Container(captions)))
        );
    }

    #[tokio::test]
    async fn cues_render_into_the_overlay_and_cleanup_removes_it() {
        let page = Page::new("https://example.com/lesson", "").unwrap();
        let track = page.with_dom(|doc| {
            let (_, video) = player(doc);
            doc.add_text_track(video, TrackKind::Subtitles)
        });
        let (ctx, _lookups) = context(&page);
        let mut detector = GenericDetector::new(ctx);

        let handle = detector.detect().unwrap();
        assert_eq!(handle.mode, SurfaceMode::CueTrack);
        let overlay = handle.element;
        page.with_dom(|doc| {
            assert!(doc.element(overlay).unwrap().has_class(OVERLAY_CLASS));
            assert_eq!(doc.track(track).unwrap().mode, TrackMode::Hidden);
        });

        page.with_dom(|doc| doc.set_active_cues(track, vec!["the quick fox".into()]));
        let mut words = Vec::new();
        for _ in 0..20 {
            tokio::task::yield_now().await;
            words = page.with_dom(|doc| overlay_words(doc, overlay));
            if !words.is_empty() {
                break;
            }
        }
        assert_eq!(words, vec!["the", "quick", "fox"]);

        detector.cleanup();
        detector.cleanup();
        page.with_dom(|doc| {
            assert!(!doc.is_connected(overlay));
            assert_eq!(doc.active_observer_count(), 0);
        });
    }

    #[tokio::test]
    async fn video_without_tracks_falls_back_to_selection() {
        let page = Page::new("https://example.com/lesson", "").unwrap();
        let video = page.with_dom(|doc| player(doc).1);
        let (lookups, mut rx) = mpsc::unbounded_channel();
        let config = DetectionConfig {
            selection_debounce: Duration::from_millis(20),
            ..DetectionConfig::default()
        };
        let mut detector = GenericDetector::new(DetectorContext::new(page.clone(), lookups, config));

        let handle = detector.detect().unwrap();
        assert_eq!(handle.mode, SurfaceMode::Selection);
        assert_eq!(handle.element, video);

        page.with_dom(|doc| doc.set_selection("one two three four five six"));
        page.dispatch(PageEvent::MouseUp {
            position: Point::new(1.0, 1.0),
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        page.with_dom(|doc| doc.set_selection("  merci "));
        page.dispatch(PageEvent::MouseUp {
            position: Point::new(2.0, 3.0),
        });

        let request = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.text, "merci");
        assert_eq!(request.position, Point::new(2.0, 3.0));
        assert_eq!(request.source, "generic-video");
        detector.cleanup();
    }

    #[tokio::test]
    async fn selection_changed_during_debounce_is_dropped() {
        let page = Page::new("https://example.com/lesson", "").unwrap();
        page.with_dom(|doc| player(doc));
        let (lookups, mut rx) = mpsc::unbounded_channel();
        let config = DetectionConfig {
            selection_debounce: Duration::from_millis(30),
            ..DetectionConfig::default()
        };
        let mut detector = GenericDetector::new(DetectorContext::new(page.clone(), lookups, config));
        detector.detect().unwrap();

        page.with_dom(|doc| doc.set_selection("merci"));
        page.dispatch(PageEvent::MouseUp {
            position: Point::default(),
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        page.with_dom(|doc| doc.clear_selection());

        let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(outcome.is_err());
        detector.cleanup();
    }

    #[tokio::test]
    async fn page_without_video_only_watches_for_one() {
        let page = Page::new("https://example.com/", "").unwrap();
        let (ctx, _lookups) = context(&page);
        let redetect = Arc::clone(&ctx.redetect);
        let mut detector = GenericDetector::new(ctx);

        assert!(detector.detect().is_none());
        assert_eq!(page.with_dom(|doc| doc.active_observer_count()), 1);

        page.with_dom(|doc| {
            player(doc);
        });
        tokio::time::timeout(Duration::from_secs(1), redetect.notified())
            .await
            .unwrap();

        detector.cleanup();
        assert_eq!(page.with_dom(|doc| doc.active_observer_count()), 0);
    }
}
