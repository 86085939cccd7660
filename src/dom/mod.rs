//! In-process model of a host page document.
//!
//! Detectors never own page nodes: they hold `NodeId`s into a shared
//! `Document` and re-validate them (`is_connected`) before acting, because the
//! host page keeps mutating underneath them.

mod page;
mod selector;
mod track;

use std::collections::BTreeMap;

use tokio::sync::{broadcast, mpsc};

pub use page::{Page, PageEvent, Point};
pub use selector::Selector;
pub use track::{TextTrack, TrackId, TrackKind, TrackMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("node {0:?} has no parent")]
    Detached(NodeId),
    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    attrs: BTreeMap<String, String>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        self.attrs.insert(name.to_string(), value.to_string());
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|value| value.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Element(ElementData),
    Text(String),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub character_data: bool,
    pub subtree: bool,
}

impl ObserveOptions {
    pub fn subtree_text() -> Self {
        Self {
            child_list: true,
            character_data: true,
            subtree: true,
        }
    }

    pub fn subtree_children() -> Self {
        Self {
            child_list: true,
            character_data: false,
            subtree: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    CharacterData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

struct ObserverRegistration {
    id: ObserverId,
    target: NodeId,
    options: ObserveOptions,
    sender: mpsc::UnboundedSender<MutationRecord>,
}

pub struct Document {
    nodes: Vec<Node>,
    html: NodeId,
    body: NodeId,
    observers: Vec<ObserverRegistration>,
    next_observer: u64,
    tracks: Vec<TextTrack>,
    selection: String,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            html: NodeId(0),
            body: NodeId(0),
            observers: Vec::new(),
            next_observer: 0,
            tracks: Vec::new(),
            selection: String::new(),
        };
        doc.html = doc.alloc(NodeData::Element(ElementData::new("html")));
        doc.body = doc.alloc(NodeData::Element(ElementData::new("body")));
        doc.nodes[doc.body.0].parent = Some(doc.html);
        doc.nodes[doc.html.0].children.push(doc.body);
        doc
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn document_element(&self) -> NodeId {
        self.html
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.0).ok_or(DomError::UnknownNode(id))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element(ElementData::new(tag)))
    }

    /// Creates an element with a `class` attribute already set.
    pub fn create_element_with_class(&mut self, tag: &str, class: &str) -> NodeId {
        let mut data = ElementData::new(tag);
        data.set_attr("class", class);
        self.alloc(NodeData::Element(data))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).map(|node| &node.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id) {
            Some(NodeData::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            Some(NodeData::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.text(id).is_some()
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        match self.nodes.get_mut(id.0).map(|node| &mut node.data) {
            Some(NodeData::Element(el)) => {
                el.set_attr(name, value);
                Ok(())
            }
            Some(NodeData::Text(_)) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|p| self.element(*p).is_some())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// True when `node` is `ancestor` or lives somewhere beneath it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(self.html, id)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => out.push_str(text),
            Some(NodeData::Element(_)) => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
            None => {}
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.node(child)?;
        if self.element(parent).is_none() {
            self.node(parent)?;
            return Err(DomError::NotAnElement(parent));
        }
        if self.contains(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }

        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
            },
        });
        Ok(())
    }

    /// Detaches `id` from its parent. Removing a detached node is a no-op.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        self.node(id)?;
        self.detach(id);
        Ok(())
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != id);
        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![id],
            },
        });
    }

    /// Replaces `old` with `replacements`, in order, in a single mutation.
    pub fn replace_with(&mut self, old: NodeId, replacements: &[NodeId]) -> Result<(), DomError> {
        let parent = self.node(old)?.parent.ok_or(DomError::Detached(old))?;
        for node in replacements {
            self.node(*node)?;
            if self.contains(*node, parent) {
                return Err(DomError::Cycle {
                    parent,
                    child: *node,
                });
            }
        }
        for node in replacements {
            self.silently_detach(*node);
        }

        let index = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or(DomError::Detached(old))?;
        self.nodes[parent.0]
            .children
            .splice(index..=index, replacements.iter().copied());
        self.nodes[old.0].parent = None;
        for node in replacements {
            self.nodes[node.0].parent = Some(parent);
        }

        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: replacements.to_vec(),
                removed: vec![old],
            },
        });
        Ok(())
    }

    /// Drops every existing child of `parent` and installs `children`.
    pub fn replace_children(
        &mut self,
        parent: NodeId,
        children: &[NodeId],
    ) -> Result<(), DomError> {
        if self.element(parent).is_none() {
            self.node(parent)?;
            return Err(DomError::NotAnElement(parent));
        }
        for node in children {
            self.node(*node)?;
            if self.contains(*node, parent) {
                return Err(DomError::Cycle {
                    parent,
                    child: *node,
                });
            }
        }
        for node in children {
            self.silently_detach(*node);
        }

        let removed = std::mem::take(&mut self.nodes[parent.0].children);
        for old in &removed {
            self.nodes[old.0].parent = None;
        }
        for node in children {
            self.nodes[node.0].parent = Some(parent);
        }
        self.nodes[parent.0].children = children.to_vec();

        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: children.to_vec(),
                removed,
            },
        });
        Ok(())
    }

    fn silently_detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) -> Result<(), DomError> {
        match self.nodes.get_mut(id.0).map(|node| &mut node.data) {
            Some(NodeData::Text(text)) => {
                *text = value.to_string();
            }
            Some(NodeData::Element(_)) => return Err(DomError::NotText(id)),
            None => return Err(DomError::UnknownNode(id)),
        }
        self.notify(MutationRecord {
            target: id,
            kind: MutationKind::CharacterData,
        });
        Ok(())
    }

    /// First matching descendant of `scope` in document order; `scope` itself
    /// is not considered.
    pub fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if self.element(current).is_some_and(|el| selector.matches(el)) {
                return Some(current);
            }
            stack.extend(self.children(current).iter().rev().copied());
        }
        None
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if self.element(current).is_some_and(|el| selector.matches(el)) {
                found.push(current);
            }
            stack.extend(self.children(current).iter().rev().copied());
        }
        found
    }

    /// Shorthand for a document-wide `query_selector`.
    pub fn find(&self, selector: &Selector) -> Option<NodeId> {
        self.query_selector(self.html, selector)
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let mut stack = vec![self.html];
        while let Some(current) = stack.pop() {
            if self.element(current).and_then(|el| el.id()) == Some(id) {
                return Some(current);
            }
            stack.extend(self.children(current).iter().rev().copied());
        }
        None
    }

    // Observers

    pub fn observe(
        &mut self,
        target: NodeId,
        options: ObserveOptions,
    ) -> (ObserverId, mpsc::UnboundedReceiver<MutationRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push(ObserverRegistration {
            id,
            target,
            options,
            sender,
        });
        (id, receiver)
    }

    /// Stops delivery to `id`. Unknown or already disconnected ids are ignored.
    pub fn disconnect(&mut self, id: ObserverId) {
        self.observers.retain(|reg| reg.id != id);
    }

    pub fn active_observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, record: MutationRecord) {
        if self.observers.is_empty() {
            return;
        }
        let mut ancestors = Vec::new();
        let mut cursor = Some(record.target);
        while let Some(current) = cursor {
            ancestors.push(current);
            cursor = self.parent(current);
        }

        let is_child_list = matches!(record.kind, MutationKind::ChildList { .. });
        self.observers.retain(|reg| {
            let wanted = if is_child_list {
                reg.options.child_list
            } else {
                reg.options.character_data
            };
            let in_scope = reg.target == record.target
                || (reg.options.subtree && ancestors.contains(&reg.target));
            if !wanted || !in_scope {
                return true;
            }
            // A dropped receiver retires the registration.
            reg.sender.send(record.clone()).is_ok()
        });
    }

    // Text tracks

    pub fn add_text_track(&mut self, video: NodeId, kind: TrackKind) -> TrackId {
        let id = TrackId(self.tracks.len());
        self.tracks.push(TextTrack::new(kind, video, false));
        id
    }

    /// Gives a `<track>` element its backing text track.
    pub fn attach_track_element(
        &mut self,
        track_element: NodeId,
        kind: TrackKind,
    ) -> Result<TrackId, DomError> {
        self.set_attr(track_element, "kind", kind.as_str())?;
        let id = TrackId(self.tracks.len());
        self.tracks.push(TextTrack::new(kind, track_element, true));
        Ok(id)
    }

    pub fn track(&self, id: TrackId) -> Option<&TextTrack> {
        self.tracks.get(id.0)
    }

    /// Tracks exposed through the video's track list, including those backed
    /// by `<track>` children.
    pub fn text_tracks(&self, video: NodeId) -> Vec<TrackId> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| {
                track.owner == video || (track.from_element && self.parent(track.owner) == Some(video))
            })
            .map(|(index, _)| TrackId(index))
            .collect()
    }

    pub fn element_track(&self, track_element: NodeId) -> Option<TrackId> {
        self.tracks
            .iter()
            .position(|track| track.from_element && track.owner == track_element)
            .map(TrackId)
    }

    pub fn set_track_mode(&mut self, id: TrackId, mode: TrackMode) {
        if let Some(track) = self.tracks.get_mut(id.0) {
            track.mode = mode;
        }
    }

    /// Replaces the active cues and fires a cue change, as the media element
    /// does when playback crosses a cue boundary. Disabled tracks stay silent.
    pub fn set_active_cues(&mut self, id: TrackId, cues: Vec<String>) {
        if let Some(track) = self.tracks.get_mut(id.0) {
            track.active_cues = cues;
            if track.mode != TrackMode::Disabled {
                let _ = track.cue_tx.send(());
            }
        }
    }

    pub fn subscribe_cues(&self, id: TrackId) -> Option<broadcast::Receiver<()>> {
        self.tracks.get(id.0).map(|track| track.cue_tx.subscribe())
    }

    pub fn first_active_cue(&self, id: TrackId) -> Option<String> {
        self.tracks
            .get(id.0)
            .and_then(|track| track.active_cues.first().cloned())
    }

    // Selection

    pub fn set_selection(&mut self, text: &str) {
        self.selection = text.to_string();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection_text(&self) -> &str {
        self.selection.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caption_tree(doc: &mut Document) -> (NodeId, NodeId, NodeId) {
        let container = doc.create_element_with_class("div", "caption-window");
        let segment = doc.create_element_with_class("span", "ytp-caption-segment");
        let text = doc.create_text("hello world");
        doc.append_child(doc.body(), container).unwrap();
        doc.append_child(container, segment).unwrap();
        doc.append_child(segment, text).unwrap();
        (container, segment, text)
    }

    #[test]
    fn text_content_concatenates_descendants() {
        let mut doc = Document::new();
        let (container, segment, _) = caption_tree(&mut doc);
        let extra = doc.create_text(" again");
        doc.append_child(segment, extra).unwrap();
        assert_eq!(doc.text_content(container), "hello world again");
    }

    #[test]
    fn query_selector_skips_scope_and_finds_in_document_order() {
        let mut doc = Document::new();
        let (container, segment, _) = caption_tree(&mut doc);
        let second = doc.create_element_with_class("span", "ytp-caption-segment");
        doc.append_child(container, second).unwrap();

        assert_eq!(
            doc.query_selector(container, &Selector::Class("ytp-caption-segment")),
            Some(segment)
        );
        assert_eq!(
            doc.query_selector_all(container, &Selector::Class("ytp-caption-segment")),
            vec![segment, second]
        );
        assert_eq!(doc.query_selector(segment, &Selector::Class("ytp-caption-segment")), None);
    }

    #[test]
    fn subtree_observer_sees_descendant_mutations() {
        let mut doc = Document::new();
        let (container, segment, text) = caption_tree(&mut doc);
        let (_, mut rx) = doc.observe(container, ObserveOptions::subtree_text());

        doc.set_text(text, "bonjour").unwrap();
        let added = doc.create_text("monde");
        doc.append_child(segment, added).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            MutationRecord {
                target: text,
                kind: MutationKind::CharacterData
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            MutationRecord {
                target: segment,
                kind: MutationKind::ChildList {
                    added: vec![added],
                    removed: vec![]
                }
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn non_subtree_observer_ignores_descendants() {
        let mut doc = Document::new();
        let (container, _, text) = caption_tree(&mut doc);
        let (_, mut rx) = doc.observe(
            container,
            ObserveOptions {
                child_list: true,
                character_data: true,
                subtree: false,
            },
        );
        doc.set_text(text, "changed").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_is_idempotent_and_stops_delivery() {
        let mut doc = Document::new();
        let (container, _, text) = caption_tree(&mut doc);
        let (id, mut rx) = doc.observe(container, ObserveOptions::subtree_text());
        doc.disconnect(id);
        doc.disconnect(id);
        doc.set_text(text, "changed").unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(doc.active_observer_count(), 0);
    }

    #[test]
    fn replace_with_splices_in_place() {
        let mut doc = Document::new();
        let (_, segment, text) = caption_tree(&mut doc);
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.replace_with(text, &[a, b]).unwrap();

        assert_eq!(doc.children(segment), &[a, b]);
        assert!(!doc.is_connected(text));
        assert!(matches!(doc.replace_with(text, &[]), Err(DomError::Detached(_))));
    }

    #[test]
    fn append_child_rejects_cycles() {
        let mut doc = Document::new();
        let (container, segment, _) = caption_tree(&mut doc);
        assert!(matches!(
            doc.append_child(segment, container),
            Err(DomError::Cycle { .. })
        ));
    }

    #[test]
    fn element_tracks_are_listed_on_their_video() {
        let mut doc = Document::new();
        let video = doc.create_element("video");
        let track_el = doc.create_element("track");
        doc.append_child(doc.body(), video).unwrap();
        doc.append_child(video, track_el).unwrap();

        let element_track = doc.attach_track_element(track_el, TrackKind::Captions).unwrap();
        let programmatic = doc.add_text_track(video, TrackKind::Metadata);

        assert_eq!(doc.text_tracks(video), vec![element_track, programmatic]);
        assert_eq!(doc.element_track(track_el), Some(element_track));
        assert_eq!(doc.element(track_el).and_then(|el| el.attr("kind")), Some("captions"));
    }
}
