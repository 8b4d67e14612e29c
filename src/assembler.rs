//! Document Assembler (4.L): orders every page's content blocks into one
//! global sequence, attaches heading levels as literal `#` prefixes (or
//! demotes non-headings back to body text), and normalizes image
//! references to their canonical path.
//!
//! Global ordering is just concatenation: each page's [`ContentBlock`]s
//! arrive from the Content Parser (4.G) already in that page's local
//! reading order (4.F), so "ascending page order" is the only sort this
//! stage needs to do for content blocks. Images get their own explicit
//! sort by `element_id` because the spec calls it out separately (4.L) —
//! in a pathological layout where image crops aren't emitted in the same
//! order their source elements appear, callers should still be able to
//! walk `images` in document order without re-deriving it from
//! `ordered_content_blocks`.

use crate::output::normalize_image_reference;
use crate::types::{AssembledDocument, ContentBlock, HeadingLevel, ImageInfo, LayoutElement};
use std::collections::HashMap;

pub struct DocumentAssembler;

/// One page's already-locally-ordered output, as produced by the scheduler
/// (4.I) for a single page's `(layout, order, content)` triple.
pub struct PageContent {
    pub page_num: usize,
    pub blocks: Vec<ContentBlock>,
}

impl DocumentAssembler {
    /// Assemble the final document from every page's content, in ascending
    /// page order, applying heading-level rewrites and image-reference
    /// normalization (4.L).
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        mut pages: Vec<PageContent>,
        heading_levels: Vec<HeadingLevel>,
        detected_language: String,
        translation_enabled: bool,
        target_language: Option<String>,
        total_elements: usize,
        failed_elements: Vec<String>,
        total_processing_time_ms: u64,
    ) -> AssembledDocument {
        pages.sort_by_key(|p| p.page_num);

        let levels_by_id: HashMap<&str, &HeadingLevel> =
            heading_levels.iter().map(|h| (h.element_id.as_str(), h)).collect();

        let mut ordered_content_blocks = Vec::new();
        for page in &pages {
            for block in &page.blocks {
                let mut block = block.clone();
                if let Some(level) = levels_by_id.get(block.element_id.as_str()) {
                    apply_heading_level(&mut block, level);
                }
                normalize_image_reference(&mut block);
                ordered_content_blocks.push(block);
            }
        }

        let mut images: Vec<ImageInfo> = ordered_content_blocks
            .iter()
            .filter_map(|b| b.image_info.clone())
            .collect();
        images.sort_by_key(|img| LayoutElement::parse_element_id(&img.element_id).unwrap_or((0, 0)));

        let total_pages = pages.len();
        let successful_elements = total_elements.saturating_sub(failed_elements.len());

        AssembledDocument {
            detected_language,
            total_pages,
            ordered_content_blocks,
            heading_levels,
            images,
            translation_enabled,
            target_language,
            total_elements,
            successful_elements,
            failed_elements,
            total_processing_time_ms,
        }
    }
}

/// Rewrite `block.raw_markdown` per its assigned semantic level (4.L): a
/// level in `1..=6` becomes `"#"*level + " " + text`; level 0 demotes the
/// block to plain `text`, stripping any existing `#` prefix.
fn apply_heading_level(block: &mut ContentBlock, level: &HeadingLevel) {
    let stripped = block.raw_markdown.trim_start_matches('#').trim().to_string();
    if level.semantic_level == 0 {
        block.raw_markdown = stripped;
        block.kind = crate::types::ElementKind::Text;
    } else {
        let hashes = "#".repeat(level.semantic_level as usize);
        block.raw_markdown = format!("{hashes} {stripped}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, ElementKind};

    fn block(id: &str, kind: ElementKind, text: &str) -> ContentBlock {
        ContentBlock {
            element_id: id.to_string(),
            kind,
            raw_markdown: text.to_string(),
            trans_markdown: None,
            image_info: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn concatenates_pages_in_ascending_order() {
        let pages = vec![
            PageContent { page_num: 1, blocks: vec![block("1-0", ElementKind::Text, "p1")] },
            PageContent { page_num: 0, blocks: vec![block("0-0", ElementKind::Text, "p0")] },
        ];
        let doc = DocumentAssembler::assemble(pages, Vec::new(), "en".into(), false, None, 2, Vec::new(), 0);
        assert_eq!(doc.ordered_content_blocks[0].element_id, "0-0");
        assert_eq!(doc.ordered_content_blocks[1].element_id, "1-0");
    }

    #[test]
    fn heading_level_rewrites_hash_prefix() {
        let pages = vec![PageContent {
            page_num: 0,
            blocks: vec![block("0-0", ElementKind::DocumentTitle, "My Title")],
        }];
        let levels = vec![HeadingLevel { element_id: "0-0".to_string(), original_level: 1, semantic_level: 1, confidence: 0.9 }];
        let doc = DocumentAssembler::assemble(pages, levels, "en".into(), false, None, 1, Vec::new(), 0);
        assert_eq!(doc.ordered_content_blocks[0].raw_markdown, "# My Title");
    }

    #[test]
    fn semantic_level_zero_demotes_to_text() {
        let pages = vec![PageContent {
            page_num: 0,
            blocks: vec![block("0-0", ElementKind::ParagraphTitle, "## Not really a heading")],
        }];
        let levels = vec![HeadingLevel { element_id: "0-0".to_string(), original_level: 2, semantic_level: 0, confidence: 0.9 }];
        let doc = DocumentAssembler::assemble(pages, levels, "en".into(), false, None, 1, Vec::new(), 0);
        assert_eq!(doc.ordered_content_blocks[0].kind, ElementKind::Text);
        assert_eq!(doc.ordered_content_blocks[0].raw_markdown, "Not really a heading");
    }

    #[test]
    fn successful_elements_derived_from_total_minus_failed() {
        let pages = vec![PageContent { page_num: 0, blocks: vec![block("0-0", ElementKind::Text, "x")] }];
        let doc = DocumentAssembler::assemble(
            pages,
            Vec::new(),
            "en".into(),
            false,
            None,
            5,
            vec!["0-1".to_string(), "0-2".to_string()],
            0,
        );
        assert_eq!(doc.successful_elements, 3);
        assert_eq!(doc.failed_elements.len(), 2);
    }
}
