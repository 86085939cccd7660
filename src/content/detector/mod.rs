//! Caption surface detection.
//!
//! A detector finds where a page shows caption text and turns it into
//! clickable tokens. Two variants exist: one for the video platform whose
//! player renders captions by mutating text nodes, and a generic one for
//! plain `<video>` elements with text tracks. Which one runs is decided by
//! [`select_detector`] from the page alone.

mod generic;
mod platform;
mod supervisor;

use std::sync::Arc;

use tokio::sync::{broadcast::error::RecvError, mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::DetectionConfig;
use crate::dom::{NodeId, Page, PageEvent, Point, Selector};

use super::annotate::token_text;

pub use generic::{find_video_with_track, GenericDetector, OVERLAY_CLASS};
pub use platform::{find_caption_container, PlatformDetector};
pub use supervisor::{DetectionSupervisor, SupervisorHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorVariant {
    Platform,
    Generic,
}

impl DetectorVariant {
    /// Recorded as `context.source` on saved words.
    pub fn source(&self) -> &'static str {
        match self {
            DetectorVariant::Platform => "youtube",
            DetectorVariant::Generic => "generic-video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    /// Host text nodes are wrapped in place as the player writes them.
    LiveCaptions,
    /// Cues from a text track are rendered into our own overlay.
    CueTrack,
    /// No caption source; short selections over the page become lookups.
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub variant: DetectorVariant,
    pub element: NodeId,
    pub mode: SurfaceMode,
}

/// A word the user asked to look up.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    pub text: String,
    pub position: Point,
    pub source: &'static str,
}

/// What a detector needs from its surroundings.
#[derive(Clone)]
pub struct DetectorContext {
    pub page: Page,
    pub lookups: mpsc::UnboundedSender<LookupRequest>,
    pub config: DetectionConfig,
    /// Pinged when a detector sees a video or track appear, so the
    /// supervisor can start over.
    pub redetect: Arc<Notify>,
}

impl DetectorContext {
    pub fn new(
        page: Page,
        lookups: mpsc::UnboundedSender<LookupRequest>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            page,
            lookups,
            config,
            redetect: Arc::new(Notify::new()),
        }
    }
}

/// Platform variant when the page is, or embeds, the video platform.
pub fn select_detector(page: &Page) -> DetectorVariant {
    let host = page.url().host_str().unwrap_or_default();
    if host.contains("youtube.com") || host == "youtu.be" {
        return DetectorVariant::Platform;
    }

    let embedded = page.with_dom(|doc| {
        doc.find(&Selector::AttrContains("iframe", "src", "youtube.com/embed/"))
            .is_some()
    });
    if embedded {
        DetectorVariant::Platform
    } else {
        DetectorVariant::Generic
    }
}

pub enum Detector {
    Platform(PlatformDetector),
    Generic(GenericDetector),
}

impl Detector {
    pub fn new(variant: DetectorVariant, ctx: DetectorContext) -> Self {
        match variant {
            DetectorVariant::Platform => Detector::Platform(PlatformDetector::new(ctx)),
            DetectorVariant::Generic => Detector::Generic(GenericDetector::new(ctx)),
        }
    }

    pub fn for_page(ctx: DetectorContext) -> Self {
        let variant = select_detector(&ctx.page);
        Self::new(variant, ctx)
    }

    pub fn variant(&self) -> DetectorVariant {
        match self {
            Detector::Platform(_) => DetectorVariant::Platform,
            Detector::Generic(_) => DetectorVariant::Generic,
        }
    }

    pub fn source(&self) -> &'static str {
        self.variant().source()
    }

    pub fn detect(&mut self) -> Option<SurfaceHandle> {
        match self {
            Detector::Platform(detector) => detector.detect(),
            Detector::Generic(detector) => detector.detect(),
        }
    }

    /// Releases every observer, task and node the detector installed.
    pub fn cleanup(&mut self) {
        match self {
            Detector::Platform(detector) => detector.cleanup(),
            Detector::Generic(detector) => detector.cleanup(),
        }
    }
}

/// Turns clicks on live tokens under the scope returned by `scope` into
/// lookups until cancelled.
pub(crate) fn spawn_token_clicks<F>(
    page: Page,
    lookups: mpsc::UnboundedSender<LookupRequest>,
    source: &'static str,
    scope: F,
    cancel_token: CancellationToken,
) where
    F: Fn() -> Option<NodeId> + Send + 'static,
{
    let mut events = page.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel_token.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Ok(PageEvent::Click { target, position }) => {
                    let text = {
                        let doc = page.dom();
                        scope().and_then(|scope| token_text(&doc, scope, target))
                    };
                    if let Some(text) = text {
                        let request = LookupRequest {
                            text,
                            position,
                            source,
                        };
                        if lookups.send(request).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    });
}
