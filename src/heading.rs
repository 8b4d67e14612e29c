//! Heading-Level Analyzer (4.J): reassigns semantic heading depth (1-6, or
//! 0 to demote) to every `document_title`/`paragraph_title` block, using
//! one batched text-LLM call over the whole document rather than trusting
//! the layout detector's raw title/paragraph_title split — a layout model
//! can tell "this looks like a heading" from font size alone, but not
//! "this is the book's title vs. a running header vs. a level-3 heading",
//! which needs the surrounding document context a single batched prompt
//! provides.

use crate::model::{ModelInterface, StageSettings};
use crate::types::{ContentBlock, ElementKind, HeadingLevel};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static RESPONSE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*:\s*(\d+)").unwrap());

/// Default semantic level assigned when the model's response omits a
/// heading or returns a level outside `0..=6` (4.J).
const DEFAULT_LEVEL: u8 = 2;

pub struct HeadingLevelAnalyzer<'a> {
    model: &'a ModelInterface,
    settings: StageSettings,
}

impl<'a> HeadingLevelAnalyzer<'a> {
    pub fn new(model: &'a ModelInterface, settings: StageSettings) -> Self {
        HeadingLevelAnalyzer { model, settings }
    }

    /// Gather every heading-candidate block across the whole document, in
    /// global order, and assign each a [`HeadingLevel`].
    ///
    /// Blocks that aren't `document_title`/`paragraph_title`
    /// ([`ElementKind::is_heading_candidate`]) are skipped entirely — they
    /// never appear in the returned list, so callers should treat "not
    /// present" the same as "not a heading" when consuming the result.
    pub async fn analyze(&self, blocks: &[ContentBlock]) -> Vec<HeadingLevel> {
        let candidates: Vec<&ContentBlock> = blocks
            .iter()
            .filter(|b| b.kind.is_heading_candidate())
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let numbered_list = candidates
            .iter()
            .enumerate()
            .map(|(i, b)| format!("{}. {}", i + 1, strip_markdown(&b.raw_markdown)))
            .collect::<Vec<_>>()
            .join("\n");

        let system = crate::prompts::heading_level_system_prompt();
        let response = match self.model.chat(system, &numbered_list, &self.settings).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Heading-Level Analyzer: model call failed, defaulting every heading to level {DEFAULT_LEVEL}: {e}");
                String::new()
            }
        };

        let parsed = parse_levels(&response, candidates.len());

        candidates
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                let original_level = original_level_for(block.kind);
                let semantic_level = parsed.get(&(i + 1)).copied().unwrap_or(DEFAULT_LEVEL);
                HeadingLevel {
                    element_id: block.element_id.clone(),
                    original_level,
                    semantic_level,
                    confidence: block.confidence,
                }
            })
            .collect()
    }
}

fn original_level_for(kind: ElementKind) -> u8 {
    match kind {
        ElementKind::DocumentTitle => 1,
        _ => 2,
    }
}

/// Strip a leading `#`-run (in case an element was already Markdown-ified)
/// so the prompt sees plain heading text, not pre-rendered Markdown.
fn strip_markdown(text: &str) -> String {
    text.trim_start_matches('#').trim().replace('\n', " ")
}

/// Parse `"<number>: <level>"` lines (4.J), keeping only levels in
/// `0..=6`; out-of-range or unparseable numbers are dropped so the caller's
/// `unwrap_or(DEFAULT_LEVEL)` fallback applies.
fn parse_levels(response: &str, expected: usize) -> std::collections::HashMap<usize, u8> {
    let mut out = std::collections::HashMap::with_capacity(expected);
    for caps in RESPONSE_LINE_RE.captures_iter(response) {
        let Ok(number) = caps[1].parse::<usize>() else { continue };
        let Ok(level) = caps[2].parse::<u8>() else { continue };
        if number == 0 || number > expected || level > 6 {
            continue;
        }
        out.insert(number, level);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels_reads_numbered_pairs() {
        let response = "1: 1\n2: 2\n3: 3\n";
        let parsed = parse_levels(response, 3);
        assert_eq!(parsed.get(&1), Some(&1));
        assert_eq!(parsed.get(&2), Some(&2));
        assert_eq!(parsed.get(&3), Some(&3));
    }

    #[test]
    fn parse_levels_drops_out_of_range_levels() {
        let response = "1: 9\n2: 2\n";
        let parsed = parse_levels(response, 2);
        assert_eq!(parsed.get(&1), None);
        assert_eq!(parsed.get(&2), Some(&2));
    }

    #[test]
    fn parse_levels_ignores_numbers_past_expected_count() {
        let response = "1: 1\n5: 3\n";
        let parsed = parse_levels(response, 2);
        assert_eq!(parsed.get(&5), None);
    }

    #[test]
    fn parse_levels_handles_garbage_response() {
        let parsed = parse_levels("no structured output at all", 3);
        assert!(parsed.is_empty());
    }

    #[test]
    fn original_level_matches_kind() {
        assert_eq!(original_level_for(ElementKind::DocumentTitle), 1);
        assert_eq!(original_level_for(ElementKind::ParagraphTitle), 2);
    }

    #[test]
    fn strip_markdown_removes_heading_hashes() {
        assert_eq!(strip_markdown("## Section One"), "Section One");
        assert_eq!(strip_markdown("No heading here"), "No heading here");
    }
}
