use serde::{Deserialize, Serialize};

/// Marker the model appends when the learner has met the lesson objectives.
pub const LESSON_COMPLETE_MARKER: &str = "[LESSON_COMPLETE]";

const DIAGRAM_FENCE: &str = "```mermaid";
const FENCE: &str = "```";

/// Terminal metadata of a generation: ground truth for what the caller sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingResult {
    pub display_text: String,
    pub audio_text: String,
    pub diagram: Option<String>,
    pub lesson_complete: bool,
}

impl TeachingResult {
    /// Derive the structured result from the full generated text.
    ///
    /// A fenced ```mermaid block becomes the diagram, the completion marker
    /// sets `lesson_complete`, and whatever remains is the display text.
    pub fn from_completion(text: &str) -> Self {
        let lesson_complete = text.contains(LESSON_COMPLETE_MARKER);
        let without_marker = text.replace(LESSON_COMPLETE_MARKER, "");

        let (display, diagram) = split_diagram(&without_marker);
        let display_text = collapse_blank_lines(&display);

        Self {
            audio_text: display_text.clone(),
            display_text,
            diagram,
            lesson_complete,
        }
    }
}

/// Remove the first mermaid block from `text`, returning it separately.
fn split_diagram(text: &str) -> (String, Option<String>) {
    let Some(start) = text.find(DIAGRAM_FENCE) else {
        return (text.to_string(), None);
    };
    let body_start = start + DIAGRAM_FENCE.len();
    let (body, rest) = match text[body_start..].find(FENCE) {
        Some(end) => (
            &text[body_start..body_start + end],
            &text[body_start + end + FENCE.len()..],
        ),
        // Unterminated block: everything after the fence is diagram.
        None => (&text[body_start..], ""),
    };

    let diagram = body.trim();
    let mut display = String::with_capacity(text.len());
    display.push_str(&text[..start]);
    display.push_str(rest);

    let diagram = (!diagram.is_empty()).then(|| diagram.to_string());
    (display, diagram)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.trim().lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}
