//! Translator (4.K): batched LLM translation of content blocks, preserving
//! Markdown structure and never touching math.
//!
//! Batches of 10 blocks at a time (4.K) rather than one call per block: a
//! single block's translation quality improves when the model sees
//! neighbouring blocks for context, and batching amortises the fixed cost
//! of a model round-trip. Non-translatable kinds and already-empty blocks
//! never enter a batch at all — they're assigned `trans_markdown = ""`
//! before any model call happens.

use crate::model::{ModelInterface, StageSettings};
use crate::types::ContentBlock;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

const BATCH_SIZE: usize = 10;

static TRANSLATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<translated(?:\s+id="(\d+)")?\s*>(.*?)</translated>"#).unwrap());

pub struct Translator<'a> {
    model: &'a ModelInterface,
    settings: StageSettings,
    target_language: String,
}

impl<'a> Translator<'a> {
    pub fn new(model: &'a ModelInterface, settings: StageSettings, target_language: impl Into<String>) -> Self {
        Translator {
            model,
            settings,
            target_language: target_language.into(),
        }
    }

    /// Translate every block's `raw_markdown`, filling in `trans_markdown`
    /// for all of them (non-translatable/empty blocks get `Some("")`
    /// without a model call; everything else is batched through the model).
    pub async fn translate(&self, blocks: &mut [ContentBlock]) {
        let mut pending_indices = Vec::new();

        for (i, block) in blocks.iter_mut().enumerate() {
            if block.kind.is_non_translatable() || block.raw_markdown.trim().is_empty() {
                block.trans_markdown = Some(String::new());
            } else {
                pending_indices.push(i);
            }
        }

        for chunk in pending_indices.chunks(BATCH_SIZE) {
            self.translate_batch(blocks, chunk).await;
        }
    }

    async fn translate_batch(&self, blocks: &mut [ContentBlock], indices: &[usize]) {
        let system = crate::prompts::translator_system_prompt(&self.target_language);
        let user = indices
            .iter()
            .enumerate()
            .map(|(pos, &idx)| format!(r#"<content id="{}">{}</content>"#, pos + 1, blocks[idx].raw_markdown))
            .collect::<Vec<_>>()
            .join("\n\n");

        match self.model.chat(&system, &user, &self.settings).await {
            Ok(response) => {
                let translations = parse_translations(&response, indices.len());
                for (pos, &idx) in indices.iter().enumerate() {
                    blocks[idx].trans_markdown = Some(translations.get(pos).cloned().unwrap_or_default());
                }
            }
            Err(e) => {
                warn!(
                    "Translator: batch of {} block(s) failed, emitting empty translations: {e}",
                    indices.len()
                );
                for &idx in indices {
                    blocks[idx].trans_markdown = Some(String::new());
                }
            }
        }
    }
}

/// Parse `<translated id="N">...</translated>` segments out of the model's
/// response, returned in input order. If the model returned `id`s, they're
/// used to place each segment (tolerating out-of-order responses); if it
/// didn't (or ids don't parse), segments are taken in appearance order. Pads
/// with `""` or truncates to exactly `expected` entries — a count mismatch
/// never raises (4.K: "if count mismatches, pad with `""` or truncate").
fn parse_translations(response: &str, expected: usize) -> Vec<String> {
    let mut by_id: std::collections::HashMap<usize, String> = std::collections::HashMap::new();
    let mut in_order: Vec<String> = Vec::new();
    let mut any_id = false;

    for caps in TRANSLATED_RE.captures_iter(response) {
        let body = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        if let Some(id_match) = caps.get(1) {
            if let Ok(id) = id_match.as_str().parse::<usize>() {
                any_id = true;
                by_id.insert(id, body.clone());
            }
        }
        in_order.push(body);
    }

    let mut out: Vec<String> = if any_id {
        (1..=expected).map(|i| by_id.get(&i).cloned().unwrap_or_default()).collect()
    } else {
        in_order
    };

    out.resize(expected, String::new());
    out.truncate(expected);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_translations_reads_ided_segments_in_order() {
        let response = r#"<translated id="1">Bonjour</translated><translated id="2">Monde</translated>"#;
        let out = parse_translations(response, 2);
        assert_eq!(out, vec!["Bonjour".to_string(), "Monde".to_string()]);
    }

    #[test]
    fn parse_translations_pads_when_model_returns_fewer() {
        let response = r#"<translated id="1">Only one</translated>"#;
        let out = parse_translations(response, 3);
        assert_eq!(out, vec!["Only one".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn parse_translations_truncates_when_model_returns_more() {
        let response = r#"<translated id="1">A</translated><translated id="2">B</translated><translated id="3">C</translated>"#;
        let out = parse_translations(response, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn parse_translations_handles_ids_out_of_order() {
        let response = r#"<translated id="2">Second</translated><translated id="1">First</translated>"#;
        let out = parse_translations(response, 2);
        assert_eq!(out, vec!["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn parse_translations_falls_back_to_appearance_order_without_ids() {
        let response = r#"<translated>First</translated><translated>Second</translated>"#;
        let out = parse_translations(response, 2);
        assert_eq!(out, vec!["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn parse_translations_on_garbage_response_is_all_empty() {
        let out = parse_translations("no tags here", 2);
        assert_eq!(out, vec![String::new(), String::new()]);
    }
}
