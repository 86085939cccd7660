use super::ElementData;

/// The subset of CSS selectors the detectors need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(&'static str),
    Class(&'static str),
    Id(&'static str),
    TagClass(&'static str, &'static str),
    /// `[class*="fragment"]`
    ClassContains(&'static str),
    /// `tag[attr='value']`
    TagAttr(&'static str, &'static str, &'static str),
    /// `tag[attr*="fragment"]`
    AttrContains(&'static str, &'static str, &'static str),
    AnyOf(Vec<Selector>),
}

impl Selector {
    pub fn any_of(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Selector::AnyOf(selectors.into_iter().collect())
    }

    pub fn matches(&self, element: &ElementData) -> bool {
        match self {
            Selector::Tag(tag) => element.tag.eq_ignore_ascii_case(tag),
            Selector::Class(class) => element.has_class(class),
            Selector::Id(id) => element.id() == Some(*id),
            Selector::TagClass(tag, class) => {
                element.tag.eq_ignore_ascii_case(tag) && element.has_class(class)
            }
            Selector::ClassContains(fragment) => element
                .attr("class")
                .map(|value| value.contains(fragment))
                .unwrap_or(false),
            Selector::TagAttr(tag, attr, value) => {
                element.tag.eq_ignore_ascii_case(tag) && element.attr(attr) == Some(*value)
            }
            Selector::AttrContains(tag, attr, fragment) => {
                element.tag.eq_ignore_ascii_case(tag)
                    && element
                        .attr(attr)
                        .map(|value| value.contains(fragment))
                        .unwrap_or(false)
            }
            Selector::AnyOf(selectors) => selectors.iter().any(|s| s.matches(element)),
        }
    }
}
