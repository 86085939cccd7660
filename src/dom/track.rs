use tokio::sync::broadcast;

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub(super) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Subtitles,
    Captions,
    Descriptions,
    Chapters,
    Metadata,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Subtitles => "subtitles",
            TrackKind::Captions => "captions",
            TrackKind::Descriptions => "descriptions",
            TrackKind::Chapters => "chapters",
            TrackKind::Metadata => "metadata",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subtitles" => Some(TrackKind::Subtitles),
            "captions" => Some(TrackKind::Captions),
            "descriptions" => Some(TrackKind::Descriptions),
            "chapters" => Some(TrackKind::Chapters),
            "metadata" => Some(TrackKind::Metadata),
            _ => None,
        }
    }

    /// Subtitle and caption tracks carry spoken text.
    pub fn is_spoken_text(&self) -> bool {
        matches!(self, TrackKind::Subtitles | TrackKind::Captions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    Disabled,
    /// Cues fire but the player does not render them.
    Hidden,
    Showing,
}

#[derive(Debug)]
pub struct TextTrack {
    pub kind: TrackKind,
    pub mode: TrackMode,
    /// The `<video>` for programmatic tracks, the `<track>` element otherwise.
    pub owner: NodeId,
    pub from_element: bool,
    pub(super) active_cues: Vec<String>,
    pub(super) cue_tx: broadcast::Sender<()>,
}

impl TextTrack {
    pub(super) fn new(kind: TrackKind, owner: NodeId, from_element: bool) -> Self {
        let (cue_tx, _) = broadcast::channel(32);
        Self {
            kind,
            mode: TrackMode::Disabled,
            owner,
            from_element,
            active_cues: Vec::new(),
            cue_tx,
        }
    }

    pub fn active_cues(&self) -> &[String] {
        &self.active_cues
    }
}
