//! Splits caption text into clickable word tokens.

use crate::dom::{DomError, Document, NodeData, NodeId, Selector};

pub const TOKEN_CLASS: &str = "learnflow-word";

const SELECTION_MAX_CHARS: usize = 50;
const SELECTION_MAX_WORDS: usize = 5;

pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Token spans for `words`, separated by single-space text nodes. The nodes
/// are created detached.
fn build_tokens(doc: &mut Document, words: &[&str]) -> Result<(Vec<NodeId>, Vec<NodeId>), DomError> {
    let mut nodes = Vec::with_capacity(words.len() * 2);
    let mut tokens = Vec::with_capacity(words.len());
    for (index, word) in words.iter().enumerate() {
        if index > 0 {
            nodes.push(doc.create_text(" "));
        }
        let span = doc.create_element_with_class("span", TOKEN_CLASS);
        let text = doc.create_text(word);
        doc.append_child(span, text)?;
        nodes.push(span);
        tokens.push(span);
    }
    Ok((nodes, tokens))
}

/// Replaces everything inside `container` with tokens for `line`. Old tokens
/// are dropped with the rest of the old content. Returns the new token spans.
pub fn annotate(doc: &mut Document, container: NodeId, line: &str) -> Result<Vec<NodeId>, DomError> {
    let (nodes, tokens) = build_tokens(doc, &tokenize(line))?;
    doc.replace_children(container, &nodes)?;
    Ok(tokens)
}

/// Wraps the words of one host text node in place. Whitespace-only nodes,
/// detached nodes and text already inside a token are left alone.
pub fn wrap_text_node(doc: &mut Document, text_node: NodeId) -> Result<Vec<NodeId>, DomError> {
    let Some(raw) = doc.text(text_node).map(str::to_string) else {
        return Err(DomError::NotText(text_node));
    };
    let Some(parent) = doc.parent_element(text_node) else {
        return Ok(Vec::new());
    };
    if doc.element(parent).is_some_and(|el| el.has_class(TOKEN_CLASS)) {
        return Ok(Vec::new());
    }

    let words = tokenize(&raw);
    if words.is_empty() {
        return Ok(Vec::new());
    }
    let (nodes, tokens) = build_tokens(doc, &words)?;
    doc.replace_with(text_node, &nodes)?;
    Ok(tokens)
}

/// Wraps every direct text child of `element`.
pub fn wrap_text_children(doc: &mut Document, element: NodeId) -> Result<usize, DomError> {
    let text_children: Vec<NodeId> = doc
        .children(element)
        .iter()
        .copied()
        .filter(|child| doc.is_text(*child))
        .collect();

    let mut wrapped = 0;
    for child in text_children {
        wrapped += wrap_text_node(doc, child)?.len();
    }
    Ok(wrapped)
}

/// Turns every token under `scope` back into a plain text node.
pub fn unwrap_tokens(doc: &mut Document, scope: NodeId) -> Result<usize, DomError> {
    let tokens = doc.query_selector_all(scope, &Selector::Class(TOKEN_CLASS));
    for token in &tokens {
        let text = doc.text_content(*token);
        let plain = doc.create_text(&text);
        doc.replace_with(*token, &[plain])?;
    }
    Ok(tokens.len())
}

/// The word behind a click target, if the target is (or sits inside) a live
/// token under `scope`.
pub fn token_text(doc: &Document, scope: NodeId, target: NodeId) -> Option<String> {
    let token = match doc.data(target)? {
        NodeData::Text(_) => doc.parent_element(target)?,
        NodeData::Element(_) => target,
    };
    let is_token = doc.element(token)?.has_class(TOKEN_CLASS);
    if !is_token || token == scope || !doc.contains(scope, token) || !doc.is_connected(token) {
        return None;
    }
    Some(doc.text_content(token))
}

/// Whether a selection is short enough to be treated as a word lookup.
pub fn is_lookup_selection(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text.chars().count() <= SELECTION_MAX_CHARS
        && text.split_whitespace().count() <= SELECTION_MAX_WORDS
}
