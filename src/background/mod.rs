//! Long-lived background service: answers bus requests, keeps the tab
//! registry and runs assistant calls off the request loop.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assistant::AssistantClient;
use crate::auth::AuthHandle;
use crate::bus::{
    AuthState, Bus, BusError, BusEvent, BusMessage, PanelKind, Reply, Request, Response,
    TabCommand, TabId,
};
use crate::settings::SettingsStore;

struct TabEntry {
    url: String,
    commands: mpsc::UnboundedSender<TabCommand>,
}

pub struct BackgroundService<A> {
    bus: Bus,
    settings: Arc<SettingsStore>,
    assistant: Arc<A>,
    auth: AuthHandle,
    tabs: HashMap<TabId, TabEntry>,
    active_tab: Option<TabId>,
    next_tab: u64,
}

impl<A: AssistantClient> BackgroundService<A> {
    pub fn new(bus: Bus, settings: Arc<SettingsStore>, assistant: Arc<A>, auth: AuthHandle) -> Self {
        Self {
            bus,
            settings,
            assistant,
            auth,
            tabs: HashMap::new(),
            active_tab: None,
            next_tab: 1,
        }
    }

    pub fn spawn(
        self,
        inbox: mpsc::UnboundedReceiver<BusMessage>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox, cancel_token))
    }

    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<BusMessage>,
        cancel_token: CancellationToken,
    ) {
        let mut auth_rx = self.auth.watch();

        loop {
            tokio::select! {
                message = inbox.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let user = auth_rx.borrow_and_update().clone();
                    self.on_auth_changed(AuthState::from(user.as_ref()));
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("background service shutting down");
    }

    fn on_auth_changed(&self, state: AuthState) {
        info!(
            "auth state changed: {}",
            if state.is_authenticated {
                "authenticated"
            } else {
                "not authenticated"
            }
        );
        if !state.is_authenticated {
            if let Err(err) = self.settings.reset() {
                warn!("failed to reset settings after sign-out: {err:?}");
            }
        }
        self.bus.emit(BusEvent::AuthStateChanged(state));
    }

    fn handle_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::Request { request, reply } => self.handle_request(request, reply),
            BusMessage::AttachTab {
                url,
                commands,
                reply,
            } => {
                let tab_id = TabId(self.next_tab);
                self.next_tab += 1;
                self.tabs.insert(
                    tab_id,
                    TabEntry {
                        url: url.clone(),
                        commands,
                    },
                );
                // The most recently attached page is the one in front.
                self.active_tab = Some(tab_id);
                let _ = reply.send(tab_id);
                self.bus.emit(BusEvent::TabUpdated { tab_id, url });
            }
            BusMessage::ActivateTab(tab_id) => {
                if let Some(entry) = self.tabs.get(&tab_id) {
                    self.active_tab = Some(tab_id);
                    self.bus.emit(BusEvent::TabUpdated {
                        tab_id,
                        url: entry.url.clone(),
                    });
                }
            }
            BusMessage::DetachTab(tab_id) => {
                self.tabs.remove(&tab_id);
                if self.active_tab == Some(tab_id) {
                    self.active_tab = None;
                }
            }
        }
    }

    fn handle_request(&mut self, request: Request, reply: oneshot::Sender<Reply>) {
        match request {
            Request::GetSettings => {
                let _ = reply.send(Ok(Response::Settings(self.settings.get())));
            }
            Request::SaveSettings { settings } => {
                let result = self
                    .settings
                    .apply(settings)
                    .map(Response::Settings)
                    .map_err(|err| BusError::Failed(format!("{err:#}")));
                let _ = reply.send(result);
            }
            Request::GetAuthState => {
                let user = self.auth.current();
                let _ = reply.send(Ok(Response::AuthState(AuthState::from(user.as_ref()))));
            }
            Request::TranslateWord(request) => {
                info!("translation request for '{}'", request.word);
                let assistant = self.assistant.clone();
                tokio::spawn(async move {
                    let result = assistant
                        .translate(request)
                        .await
                        .map(Response::Translation)
                        .map_err(BusError::from);
                    if let Err(err) = &result {
                        warn!("translation failed: {err}");
                    }
                    let _ = reply.send(result);
                });
            }
            Request::AskAssistant(request) => {
                let assistant = self.assistant.clone();
                tokio::spawn(async move {
                    let result = assistant
                        .chat(request)
                        .await
                        .map(Response::Chat)
                        .map_err(BusError::from);
                    let _ = reply.send(result);
                });
            }
            Request::Summarize(request) => {
                let assistant = self.assistant.clone();
                tokio::spawn(async move {
                    let result = assistant
                        .summarize(request)
                        .await
                        .map(Response::Summary)
                        .map_err(BusError::from);
                    let _ = reply.send(result);
                });
            }
            Request::TogglePanel { panel } => self.forward_toggle(panel, reply),
        }
    }

    fn forward_toggle(&mut self, panel: PanelKind, reply: oneshot::Sender<Reply>) {
        let Some(entry) = self.active_tab.and_then(|id| self.tabs.get(&id)) else {
            info!("no active tab to send panel toggle to");
            let _ = reply.send(Err(BusError::NoActiveTab));
            return;
        };

        let (tab_reply, tab_rx) = oneshot::channel();
        if entry
            .commands
            .send(TabCommand::TogglePanel {
                panel,
                reply: tab_reply,
            })
            .is_err()
        {
            if let Some(id) = self.active_tab.take() {
                self.tabs.remove(&id);
            }
            let _ = reply.send(Err(BusError::NoActiveTab));
            return;
        }

        tokio::spawn(async move {
            let result = tab_rx
                .await
                .map(|open| Response::PanelToggled { panel, open })
                .map_err(|_| BusError::NoActiveTab);
            let _ = reply.send(result);
        });
    }
}
