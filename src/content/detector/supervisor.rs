use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dom::{
    Document, MutationKind, MutationRecord, ObserveOptions, PageEvent, Selector,
};
use crate::{log_debug, log_info};

use super::{Detector, DetectorContext, SurfaceHandle};

const ENABLE_LOGS: bool = true;

/// Runs detection attempts for one page and owns the installed detector.
///
/// Each attempt disposes the previous detector first, so at most one set of
/// observers is live. After `max_attempts` failures the last detector stays
/// installed (it may still be watching for a video) until a restart signal
/// arrives: an explicit `VideoLoaded` page event, a `video` element inserted
/// anywhere in the document, the current surface leaving the document, or a
/// detector asking for a new pass.
pub struct DetectionSupervisor {
    ctx: DetectorContext,
    current: Option<Detector>,
    surface: watch::Sender<Option<SurfaceHandle>>,
}

pub struct SupervisorHandle {
    pub surface: watch::Receiver<Option<SurfaceHandle>>,
    pub task: JoinHandle<()>,
}

impl DetectionSupervisor {
    pub fn spawn(ctx: DetectorContext, cancel_token: CancellationToken) -> SupervisorHandle {
        let (surface, surface_rx) = watch::channel(None);
        let supervisor = Self {
            ctx,
            current: None,
            surface,
        };
        let task = tokio::spawn(supervisor.run(cancel_token));
        SupervisorHandle {
            surface: surface_rx,
            task,
        }
    }

    async fn run(mut self, cancel_token: CancellationToken) {
        let mut events = self.ctx.page.subscribe();
        let redetect = self.ctx.redetect.clone();
        let max_attempts = self.ctx.config.max_attempts;
        let mut attempts = 0u32;
        let mut next_attempt = Some(Instant::now());
        let (observer, mut inserted) = self.ctx.page.with_dom(|doc| {
            let root = doc.document_element();
            doc.observe(root, ObserveOptions::subtree_children())
        });

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = wait_until(next_attempt) => {
                    attempts += 1;
                    if self.attempt() {
                        log_info!("caption surface found after {attempts} attempt(s)");
                        next_attempt = None;
                    } else if attempts >= max_attempts {
                        log_info!("no caption surface after {attempts} attempts, giving up");
                        next_attempt = None;
                    } else {
                        next_attempt = Some(Instant::now() + self.ctx.config.retry_delay(attempts));
                    }
                }
                _ = redetect.notified() => {
                    log_debug!("detector asked for a new pass, restarting detection");
                    attempts = 0;
                    next_attempt = Some(Instant::now());
                }
                Some(record) = inserted.recv() => {
                    let restart = self.ctx.page.with_dom(|doc| {
                        adds_video(doc, &record) || self.surface_detached(doc)
                    });
                    if restart {
                        log_debug!("video added or surface removed, restarting detection");
                        attempts = 0;
                        next_attempt = Some(Instant::now());
                    }
                }
                event = events.recv() => match event {
                    Ok(PageEvent::VideoLoaded) => {
                        log_debug!("video loaded, restarting detection");
                        attempts = 0;
                        next_attempt = Some(Instant::now());
                    }
                    Ok(PageEvent::BeforeUnload) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                },
            }
        }

        self.ctx.page.with_dom(|doc| doc.disconnect(observer));
        self.dispose();
        self.surface.send_replace(None);
    }

    fn attempt(&mut self) -> bool {
        self.dispose();
        let mut detector = Detector::for_page(self.ctx.clone());
        let handle = detector.detect();
        self.current = Some(detector);
        self.surface.send_replace(handle);
        handle.is_some()
    }

    fn surface_detached(&self, doc: &Document) -> bool {
        self.surface
            .borrow()
            .is_some_and(|handle| !doc.is_connected(handle.element))
    }

    fn dispose(&mut self) {
        if let Some(mut detector) = self.current.take() {
            detector.cleanup();
        }
    }
}

fn adds_video(doc: &Document, record: &MutationRecord) -> bool {
    let MutationKind::ChildList { added, .. } = &record.kind else {
        return false;
    };
    let video = Selector::Tag("video");
    added.iter().any(|node| {
        doc.element(*node).is_some_and(|el| video.matches(el))
            || doc.query_selector(*node, &video).is_some()
    })
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
