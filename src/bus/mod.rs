//! Process-wide message bus between the background service, page content
//! scripts and panels.
//!
//! Broadcast events fan out to every subscriber. Requests go to the single
//! background service and are answered through a paired oneshot reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::assistant::{
    AssistantError, ChatReply, ChatRequest, SummarizeRequest, SummaryReply, TranslateRequest,
    Translation,
};
use crate::db::models::{ChatTurn, NoteEvent, StoredRow, WordEvent};
use crate::remote::AuthUser;
use crate::settings::{SettingsPatch, UserSettings};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Chat,
    Notes,
    Summary,
}

impl PanelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PanelKind::Chat => "chat",
            PanelKind::Notes => "notes",
            PanelKind::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl From<Option<&AuthUser>> for AuthState {
    fn from(user: Option<&AuthUser>) -> Self {
        Self {
            is_authenticated: user.is_some(),
            email: user.and_then(|u| u.email.clone()),
            display_name: user.and_then(|u| u.display_name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusEvent {
    WordAdded(StoredRow<WordEvent>),
    NoteAdded(StoredRow<NoteEvent>),
    ChatAdded(StoredRow<ChatTurn>),
    AuthStateChanged(AuthState),
    #[serde(rename_all = "camelCase")]
    TabUpdated { tab_id: TabId, url: String },
    QueueDrained { delivered: usize, failed: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetSettings,
    SaveSettings { settings: SettingsPatch },
    GetAuthState,
    TranslateWord(TranslateRequest),
    AskAssistant(ChatRequest),
    Summarize(SummarizeRequest),
    TogglePanel { panel: PanelKind },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Settings(UserSettings),
    AuthState(AuthState),
    Translation(Translation),
    Chat(ChatReply),
    Summary(SummaryReply),
    PanelToggled { panel: PanelKind, open: bool },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("background service is not running")]
    Unavailable,
    #[error("No active tab")]
    NoActiveTab,
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error("request failed: {0}")]
    Failed(String),
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

impl BusError {
    pub fn user_message(&self) -> String {
        match self {
            BusError::Assistant(err) => err.user_message().to_string(),
            BusError::Unavailable => "Still starting up, please retry".into(),
            other => other.to_string(),
        }
    }
}

pub type Reply = Result<Response, BusError>;

/// Commands the background service sends to one attached page.
#[derive(Debug)]
pub enum TabCommand {
    TogglePanel {
        panel: PanelKind,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug)]
pub enum BusMessage {
    Request {
        request: Request,
        reply: oneshot::Sender<Reply>,
    },
    AttachTab {
        url: String,
        commands: mpsc::UnboundedSender<TabCommand>,
        reply: oneshot::Sender<TabId>,
    },
    ActivateTab(TabId),
    DetachTab(TabId),
}

/// Cheap, cloneable handle onto the bus.
#[derive(Clone)]
pub struct Bus {
    events: broadcast::Sender<BusEvent>,
    inbox: mpsc::UnboundedSender<BusMessage>,
}

impl Bus {
    /// Creates the bus and the receiving end the background service serves.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (inbox, rx) = mpsc::unbounded_channel();
        (Self { events, inbox }, rx)
    }

    pub fn emit(&self, event: BusEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub async fn request(&self, request: Request) -> Reply {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(BusMessage::Request { request, reply })
            .map_err(|_| BusError::Unavailable)?;
        rx.await.map_err(|_| BusError::Unavailable)?
    }

    pub async fn attach_tab(
        &self,
        url: &str,
    ) -> Result<(TabId, mpsc::UnboundedReceiver<TabCommand>), BusError> {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(BusMessage::AttachTab {
                url: url.to_string(),
                commands,
                reply,
            })
            .map_err(|_| BusError::Unavailable)?;
        let tab_id = rx.await.map_err(|_| BusError::Unavailable)?;
        Ok((tab_id, commands_rx))
    }

    pub fn activate_tab(&self, tab_id: TabId) {
        let _ = self.inbox.send(BusMessage::ActivateTab(tab_id));
    }

    pub fn detach_tab(&self, tab_id: TabId) {
        let _ = self.inbox.send(BusMessage::DetachTab(tab_id));
    }

    pub async fn get_settings(&self) -> Result<UserSettings, BusError> {
        match self.request(Request::GetSettings).await? {
            Response::Settings(settings) => Ok(settings),
            _ => Err(BusError::UnexpectedResponse("GET_SETTINGS")),
        }
    }

    pub async fn save_settings(&self, settings: SettingsPatch) -> Result<UserSettings, BusError> {
        match self.request(Request::SaveSettings { settings }).await? {
            Response::Settings(settings) => Ok(settings),
            _ => Err(BusError::UnexpectedResponse("SAVE_SETTINGS")),
        }
    }

    pub async fn auth_state(&self) -> Result<AuthState, BusError> {
        match self.request(Request::GetAuthState).await? {
            Response::AuthState(state) => Ok(state),
            _ => Err(BusError::UnexpectedResponse("GET_AUTH_STATE")),
        }
    }

    pub async fn translate(&self, word: &str, target: &str) -> Result<Translation, BusError> {
        let request = TranslateRequest {
            word: word.to_string(),
            target: target.to_string(),
        };
        match self.request(Request::TranslateWord(request)).await? {
            Response::Translation(translation) => Ok(translation),
            _ => Err(BusError::UnexpectedResponse("TRANSLATE_WORD")),
        }
    }

    pub async fn ask(&self, request: ChatRequest) -> Result<ChatReply, BusError> {
        match self.request(Request::AskAssistant(request)).await? {
            Response::Chat(reply) => Ok(reply),
            _ => Err(BusError::UnexpectedResponse("ASK_ASSISTANT")),
        }
    }

    pub async fn summarize(&self, request: SummarizeRequest) -> Result<SummaryReply, BusError> {
        match self.request(Request::Summarize(request)).await? {
            Response::Summary(reply) => Ok(reply),
            _ => Err(BusError::UnexpectedResponse("SUMMARIZE")),
        }
    }

    /// Returns whether the panel is open after the toggle.
    pub async fn toggle_panel(&self, panel: PanelKind) -> Result<bool, BusError> {
        match self.request(Request::TogglePanel { panel }).await? {
            Response::PanelToggled { open, .. } => Ok(open),
            _ => Err(BusError::UnexpectedResponse("TOGGLE_PANEL")),
        }
    }
}
