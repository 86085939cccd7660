//! Generated video summaries. At most one per video, keyed by `video_id`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Term {
    pub term: String,
    pub def: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub video_id: String,
    pub bullet_points: Vec<String>,
    pub terms: Vec<Term>,
}

impl SummaryRecord {
    /// Markdown export with "Key Points" and "Key Terms" sections.
    pub fn to_markdown(&self) -> String {
        let mut content = String::from("# Summary for video\n\n## Key Points\n\n");
        for point in &self.bullet_points {
            content.push_str(&format!("* {point}\n"));
        }
        content.push_str("\n## Key Terms\n\n");
        for term in &self.terms {
            content.push_str(&format!("**{}**: {}\n\n", term.term, term.def));
        }
        content
    }
}
