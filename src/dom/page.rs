use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use url::Url;

use super::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Events the host page raises that detectors and the content script react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    MouseUp { position: Point },
    Click { target: NodeId, position: Point },
    /// Explicit "a video became available" signal from the page.
    VideoLoaded,
    BeforeUnload,
}

struct PageInner {
    url: Url,
    title: String,
    dom: Mutex<Document>,
    events: broadcast::Sender<PageEvent>,
}

/// A live page: its document plus the event stream the page emits.
///
/// Cloning is cheap; all clones refer to the same document.
#[derive(Clone)]
pub struct Page {
    inner: Arc<PageInner>,
}

impl Page {
    pub fn new(url: &str, title: &str) -> Result<Self> {
        Self::with_document(url, title, Document::new())
    }

    pub fn with_document(url: &str, title: &str, document: Document) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid page url '{url}'"))?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(PageInner {
                url,
                title: title.to_string(),
                dom: Mutex::new(document),
                events,
            }),
        })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Locks the document. Never hold the guard across an `.await`.
    pub fn dom(&self) -> MutexGuard<'_, Document> {
        match self.inner.dom.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_dom<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut guard = self.dom();
        f(&mut guard)
    }

    pub fn dispatch(&self, event: PageEvent) {
        // No listeners is fine; the page does not care who hears it.
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.inner.events.subscribe()
    }
}
