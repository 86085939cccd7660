//! Turns a caption source into a stream of distinct caption lines.

use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio_util::sync::CancellationToken;

use crate::dom::{Document, NodeId, ObserveOptions, ObserverId, Page, TrackId, TrackMode};

const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionLine {
    pub text: String,
}

/// Passes a line through only when it differs from the previous emission.
#[derive(Debug, Default)]
pub struct CueDeduper {
    last: String,
}

impl CueDeduper {
    pub fn accept(&mut self, text: &str) -> Option<String> {
        if text.is_empty() || text == self.last {
            return None;
        }
        self.last = text.to_string();
        Some(self.last.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueSource {
    /// A structured subtitle/caption track.
    Track(TrackId),
    /// A caption-styled element the player renders text into.
    Container(NodeId),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("text track {0:?} does not exist")]
    UnknownTrack(TrackId),
    #[error("caption container {0:?} is not in the document")]
    MissingContainer(NodeId),
}

/// Forwards caption changes from one source until disconnected.
pub struct SubtitleScanner {
    cancel_token: CancellationToken,
    observer: Option<ObserverId>,
}

impl SubtitleScanner {
    /// Starts scanning. Tracks are switched to `Hidden` first so the player
    /// stops rendering them while cues keep firing.
    pub fn attach(
        doc: &mut Document,
        page: &Page,
        source: CueSource,
        lines: mpsc::UnboundedSender<CaptionLine>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ScanError> {
        match source {
            CueSource::Track(track) => {
                if doc.track(track).is_none() {
                    return Err(ScanError::UnknownTrack(track));
                }
                doc.set_track_mode(track, TrackMode::Hidden);
                let cues = doc
                    .subscribe_cues(track)
                    .ok_or(ScanError::UnknownTrack(track))?;
                tokio::spawn(track_task(page.clone(), track, cues, lines, cancel_token.clone()));
                Ok(Self {
                    cancel_token,
                    observer: None,
                })
            }
            CueSource::Container(container) => {
                if !doc.is_connected(container) {
                    return Err(ScanError::MissingContainer(container));
                }
                let (observer, records) = doc.observe(container, ObserveOptions::subtree_text());
                tokio::spawn(container_task(
                    page.clone(),
                    container,
                    records,
                    lines,
                    cancel_token.clone(),
                ));
                Ok(Self {
                    cancel_token,
                    observer: Some(observer),
                })
            }
        }
    }

    /// Stops forwarding. Safe to call any number of times.
    pub fn disconnect(&mut self, doc: &mut Document) {
        self.cancel_token.cancel();
        if let Some(observer) = self.observer.take() {
            doc.disconnect(observer);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }
}

impl Drop for SubtitleScanner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn forward(
    deduper: &mut CueDeduper,
    text: &str,
    lines: &mpsc::UnboundedSender<CaptionLine>,
    cancel_token: &CancellationToken,
) -> bool {
    if cancel_token.is_cancelled() {
        return false;
    }
    if let Some(text) = deduper.accept(text) {
        log_debug!("caption line: {text}");
        return lines.send(CaptionLine { text }).is_ok();
    }
    true
}

async fn track_task(
    page: Page,
    track: TrackId,
    mut cues: tokio::sync::broadcast::Receiver<()>,
    lines: mpsc::UnboundedSender<CaptionLine>,
    cancel_token: CancellationToken,
) {
    let mut deduper = CueDeduper::default();
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            signal = cues.recv() => {
                match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(text) = page.with_dom(|doc| doc.first_active_cue(track)) else {
                    continue;
                };
                if !forward(&mut deduper, &text, &lines, &cancel_token) {
                    break;
                }
            }
        }
    }
}

async fn container_task(
    page: Page,
    container: NodeId,
    mut records: mpsc::UnboundedReceiver<crate::dom::MutationRecord>,
    lines: mpsc::UnboundedSender<CaptionLine>,
    cancel_token: CancellationToken,
) {
    let mut deduper = CueDeduper::default();
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            record = records.recv() => {
                if record.is_none() {
                    break;
                }
                let text = page.with_dom(|doc| {
                    if !doc.is_connected(container) {
                        return None;
                    }
                    Some(doc.text_content(container).split_whitespace().collect::<Vec<_>>().join(" "))
                });
                let Some(text) = text else {
                    log_warn!("caption container detached; scanner stopping");
                    break;
                };
                if !forward(&mut deduper, &text, &lines, &cancel_token) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::TrackKind;
    use tokio::time::{timeout, Duration};

    #[test]
    fn dedupe_only_drops_consecutive_repeats() {
        let mut deduper = CueDeduper::default();
        let emitted: Vec<String> = ["hello", "hello", "world", "hello", ""]
            .iter()
            .filter_map(|line| deduper.accept(line))
            .collect();
        assert_eq!(emitted, vec!["hello", "world", "hello"]);
    }

    fn page_with_track() -> (Page, TrackId) {
        let page = Page::new("https://example.com/lesson", "Lesson").unwrap();
        let track = page.with_dom(|doc| {
            let video = doc.create_element("video");
            let body = doc.body();
            doc.append_child(body, video).unwrap();
            doc.add_text_track(video, TrackKind::Subtitles)
        });
        (page, track)
    }

    #[tokio::test]
    async fn track_cues_are_forwarded_once_each() {
        let (page, track) = page_with_track();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = page
            .with_dom(|doc| {
                SubtitleScanner::attach(doc, &page, CueSource::Track(track), tx, CancellationToken::new())
            })
            .unwrap();
        assert_eq!(
            page.with_dom(|doc| doc.track(track).map(|t| t.mode)),
            Some(TrackMode::Hidden)
        );

        page.with_dom(|doc| doc.set_active_cues(track, vec!["hello".into()]));
        assert_eq!(rx.recv().await.unwrap().text, "hello");

        page.with_dom(|doc| doc.set_active_cues(track, vec!["hello".into()]));
        page.with_dom(|doc| doc.set_active_cues(track, vec!["world".into()]));
        assert_eq!(rx.recv().await.unwrap().text, "world");

        page.with_dom(|doc| scanner.disconnect(doc));
        page.with_dom(|doc| scanner.disconnect(doc));
        assert!(!scanner.is_active());

        page.with_dom(|doc| doc.set_active_cues(track, vec!["late".into()]));
        assert!(timeout(Duration::from_millis(50), rx.recv())
            .await
            .map(|line| line.is_none())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn container_text_is_normalized_and_deduped() {
        let page = Page::new("https://example.com/", "").unwrap();
        let (container, text) = page.with_dom(|doc| {
            let container = doc.create_element_with_class("div", "vjs-text-track-display");
            let text = doc.create_text("");
            let body = doc.body();
            doc.append_child(body, container).unwrap();
            doc.append_child(container, text).unwrap();
            (container, text)
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = page
            .with_dom(|doc| {
                SubtitleScanner::attach(
                    doc,
                    &page,
                    CueSource::Container(container),
                    tx,
                    CancellationToken::new(),
                )
            })
            .unwrap();

        page.with_dom(|doc| doc.set_text(text, "  guten   tag ").unwrap());
        assert_eq!(rx.recv().await.unwrap().text, "guten tag");

        page.with_dom(|doc| doc.set_text(text, "guten tag").unwrap());
        page.with_dom(|doc| doc.set_text(text, "auf wiedersehen").unwrap());
        assert_eq!(rx.recv().await.unwrap().text, "auf wiedersehen");

        page.with_dom(|doc| {
            scanner.disconnect(doc);
            assert_eq!(doc.active_observer_count(), 0);
        });
    }
}
