//! Study panel containers. Rendering their contents is left to the UI; the
//! page only hosts an empty, identifiable container per panel.

use crate::bus::PanelKind;
use crate::dom::{DomError, Document};

pub fn panel_element_id(panel: PanelKind) -> String {
    format!("lf-panel-{}", panel.as_str())
}

fn panel_title(panel: PanelKind) -> &'static str {
    match panel {
        PanelKind::Chat => "LearnFlow Chat",
        PanelKind::Notes => "LearnFlow Notes",
        PanelKind::Summary => "Video Summary",
    }
}

/// Opens the panel if absent and closes it if present. Returns whether the
/// panel is open afterwards.
pub fn toggle_panel(doc: &mut Document, panel: PanelKind, video_id: &str) -> Result<bool, DomError> {
    if let Some(existing) = doc.get_element_by_id(&panel_element_id(panel)) {
        doc.remove(existing)?;
        return Ok(false);
    }

    let container = doc.create_element("div");
    doc.set_attr(container, "id", &panel_element_id(panel))?;

    let title = doc.create_element("h3");
    let title_text = doc.create_text(panel_title(panel));
    doc.append_child(title, title_text)?;
    doc.append_child(container, title)?;

    let content = doc.create_element("div");
    doc.set_attr(content, "id", &format!("lf-panel-content-{}", panel.as_str()))?;
    doc.set_attr(content, "data-video-id", video_id)?;
    doc.append_child(container, content)?;

    let body = doc.body();
    doc.append_child(body, container)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_opens_then_closes() {
        let mut doc = Document::new();
        assert!(toggle_panel(&mut doc, PanelKind::Notes, "abc").unwrap());

        let panel = doc.get_element_by_id("lf-panel-notes").unwrap();
        assert_eq!(doc.text_content(panel), "LearnFlow Notes");
        let content = doc.get_element_by_id("lf-panel-content-notes").unwrap();
        assert_eq!(
            doc.element(content).and_then(|el| el.attr("data-video-id")),
            Some("abc")
        );

        assert!(!toggle_panel(&mut doc, PanelKind::Notes, "abc").unwrap());
        assert!(doc.get_element_by_id("lf-panel-notes").is_none());
    }

    #[test]
    fn panels_are_independent() {
        let mut doc = Document::new();
        toggle_panel(&mut doc, PanelKind::Chat, "abc").unwrap();
        toggle_panel(&mut doc, PanelKind::Summary, "abc").unwrap();
        assert!(doc.get_element_by_id("lf-panel-chat").is_some());
        assert!(doc.get_element_by_id("lf-panel-summary").is_some());
    }
}
