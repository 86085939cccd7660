use std::time::Duration;

use crate::dom::{DomError, NodeId, Page, Point, Selector};

pub const TOOLTIP_CLASS: &str = "learnflow-tooltip";

/// Shows `source` over `target` next to `position` and removes it after
/// `lifetime`. Replaces any tooltip still on screen.
pub fn show_tooltip(
    page: &Page,
    position: Point,
    source: &str,
    target: &str,
    lifetime: Duration,
) -> Result<NodeId, DomError> {
    let tooltip = page.with_dom(|doc| {
        let body = doc.body();
        for stale in doc.query_selector_all(body, &Selector::Class(TOOLTIP_CLASS)) {
            doc.remove(stale)?;
        }

        let tooltip = doc.create_element_with_class("div", TOOLTIP_CLASS);
        doc.set_attr(
            tooltip,
            "style",
            &format!(
                "position: fixed; left: {}px; top: {}px",
                position.x + 12.0,
                position.y - 12.0
            ),
        )?;

        let heading = doc.create_element("b");
        let heading_text = doc.create_text(source);
        doc.append_child(heading, heading_text)?;
        doc.append_child(tooltip, heading)?;
        let line_break = doc.create_element("br");
        doc.append_child(tooltip, line_break)?;
        let body_text = doc.create_text(target);
        doc.append_child(tooltip, body_text)?;

        doc.append_child(body, tooltip)?;
        Ok::<_, DomError>(tooltip)
    })?;

    let page = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(lifetime).await;
        page.with_dom(|doc| {
            let _ = doc.remove(tooltip);
        });
    });
    Ok(tooltip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tooltip_disappears_after_its_lifetime() {
        let page = Page::new("https://example.com/", "").unwrap();
        let tooltip = show_tooltip(
            &page,
            Point::new(100.0, 50.0),
            "bonjour",
            "hello",
            Duration::from_secs(3),
        )
        .unwrap();

        page.with_dom(|doc| {
            assert!(doc.is_connected(tooltip));
            assert_eq!(doc.text_content(tooltip), "bonjourhello");
            assert_eq!(
                doc.element(tooltip).and_then(|el| el.attr("style")),
                Some("position: fixed; left: 112px; top: 38px")
            );
        });

        tokio::time::sleep(Duration::from_millis(3100)).await;
        page.with_dom(|doc| {
            assert!(!doc.is_connected(tooltip));
            assert!(doc.find(&Selector::Class(TOOLTIP_CLASS)).is_none());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_tooltip_replaces_the_previous_one() {
        let page = Page::new("https://example.com/", "").unwrap();
        let lifetime = Duration::from_secs(3);
        let first = show_tooltip(&page, Point::new(0.0, 0.0), "uno", "one", lifetime).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = show_tooltip(&page, Point::new(5.0, 5.0), "dos", "two", lifetime).unwrap();

        let shown = |page: &Page| {
            page.with_dom(|doc| {
                let body = doc.body();
                doc.query_selector_all(body, &Selector::Class(TOOLTIP_CLASS))
            })
        };
        assert_eq!(shown(&page), vec![second]);
        assert!(!page.with_dom(|doc| doc.is_connected(first)));

        // The first tooltip's timer must not take the second one down.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(shown(&page), vec![second]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(shown(&page).is_empty());
    }
}
