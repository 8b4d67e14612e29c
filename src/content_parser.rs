//! Content Parser (4.G): turns one page's ordered [`LayoutElement`]s into
//! [`ContentBlock`]s, the last stage that still knows about pixels.
//!
//! Three element-kind policies apply before any model call happens, in this
//! order (grounded in `content_parser.py`'s `parse_page_content`):
//!
//! 1. **Silent drop** — [`ElementKind::is_silently_dropped`] kinds (headers,
//!    footers, page numbers) are counted as successes and never become a
//!    block.
//! 2. **Save as image** — [`ElementKind::is_always_image`] kinds, plus
//!    tables when `table_as_image` is set, are cropped out of the page
//!    raster, saved as a PNG under `images/`, and represented by an HTML
//!    `<div>`/`<img>` snippet rather than a model call.
//! 3. **Transcribe** — everything else is sent to the Model Interface (4.B)
//!    with the prompt [`crate::prompts::content_prompt_for`] picks for its
//!    kind, batched through one `parallel_vision` call per page so the
//!    page's elements share the shared concurrency budget (§5) instead of
//!    each awaiting serially.
//!
//! [`repair_hyphenated_text`] is a direct port of
//! `content_parser.py::_process_hyphenated_text`, including its paragraph
//! reflow: once a hyphen-joined line is found, the whole block's line breaks
//! are discarded and its lines rejoined with single spaces into one
//! paragraph — a quirk of the reference worth keeping rather than
//! "improving", since downstream stages were written against its output.

use crate::config::PipelineConfig;
use crate::error::ElementError;
use crate::model::{encode_image, ModelInterface, StageSettings};
use crate::types::{BoundingBox, ContentBlock, ImageInfo, LayoutElement, ReadingOrderElement};
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, warn};

/// Everything produced by parsing one page's elements.
#[derive(Debug, Default)]
pub struct ContentParsingResult {
    pub blocks: Vec<ContentBlock>,
    pub failed_elements: Vec<ElementError>,
}

/// Parse one page's ordered elements into content blocks (4.G).
///
/// `order` is the Reading-Order Analyzer's (4.F) output for this page; when
/// empty (no model configured, or the page had zero/one elements), elements
/// are processed in layout-detection order instead.
pub async fn parse_page_content(
    page_num: usize,
    page_image: &DynamicImage,
    elements: &[LayoutElement],
    order: &[ReadingOrderElement],
    images_dir: &Path,
    model: &ModelInterface,
    settings: &StageSettings,
    config: &PipelineConfig,
) -> ContentParsingResult {
    let ordered = order_elements(elements, order);

    let mut result = ContentParsingResult::default();
    let mut pending_indices = Vec::new();
    let mut pending_requests = Vec::new();

    for element in &ordered {
        if element.kind.is_silently_dropped() {
            continue;
        }

        let save_as_image =
            element.kind.is_always_image() || (element.kind == crate::types::ElementKind::Table && config.table_as_image);

        if save_as_image {
            match save_element_image(page_num, page_image, element, images_dir) {
                Ok((image_info, snippet)) => {
                    result.blocks.push(ContentBlock {
                        element_id: element.element_id.clone(),
                        kind: element.kind,
                        raw_markdown: snippet,
                        trans_markdown: None,
                        image_info: Some(image_info),
                        confidence: element.confidence,
                    });
                }
                Err(detail) => {
                    warn!("page {page_num}: element {}: {detail}", element.element_id);
                    result.failed_elements.push(ElementError::ImageSaveFailed {
                        element_id: element.element_id.clone(),
                        path: images_dir.display().to_string(),
                        detail,
                    });
                }
            }
            continue;
        }

        match crop_to_png(page_image, &element.bbox) {
            Ok(png_bytes) => {
                let system = crate::prompts::content_prompt_for(element.kind).to_string();
                let image = encode_image(&png_bytes);
                pending_indices.push(element.clone());
                pending_requests.push((system, String::new(), vec![image]));
            }
            Err(detail) => {
                result.failed_elements.push(ElementError::ImageSaveFailed {
                    element_id: element.element_id.clone(),
                    path: images_dir.display().to_string(),
                    detail,
                });
            }
        }
    }

    if !pending_requests.is_empty() {
        let responses = model.parallel_vision(pending_requests, settings).await;
        for (element, response) in pending_indices.into_iter().zip(responses) {
            match response {
                Ok(text) => {
                    let raw_markdown = if uses_default_text_prompt(element.kind) {
                        repair_hyphenated_text(&text)
                    } else {
                        text
                    };
                    result.blocks.push(ContentBlock {
                        element_id: element.element_id.clone(),
                        kind: element.kind,
                        raw_markdown,
                        trans_markdown: None,
                        image_info: None,
                        confidence: element.confidence,
                    });
                }
                Err(e) => {
                    debug!("page {page_num}: element {} failed: {e}", element.element_id);
                    result.failed_elements.push(ElementError::ModelCallFailed {
                        element_id: element.element_id.clone(),
                        retries: e.retries as u8,
                        detail: e.detail,
                    });
                }
            }
        }
    }

    result
}

/// Whether `kind` was transcribed with [`crate::prompts::default_content_prompt`]
/// rather than one of the structured prompts (table/code/algorithm/toc).
/// Hyphenation repair (4.G step 3) only ever applied to the reference's
/// plain-text transcription path — running it over a table's separator row,
/// a code block's line breaks, or a table of contents' indentation destroys
/// structure the structured prompts deliberately preserve.
fn uses_default_text_prompt(kind: crate::types::ElementKind) -> bool {
    use crate::types::ElementKind;
    !matches!(kind, ElementKind::Table | ElementKind::CodeBlock | ElementKind::Algorithm | ElementKind::Toc)
}

/// Order `elements` by the Reading-Order Analyzer's assignment when one
/// exists, falling back to layout-detection order (the order `elements`
/// arrived in) when `order` is empty — both the "no model configured" and
/// "page too small to bother" edge cases resolve to this same fallback.
fn order_elements(elements: &[LayoutElement], order: &[ReadingOrderElement]) -> Vec<LayoutElement> {
    if order.is_empty() {
        return elements.to_vec();
    }

    let mut by_id: std::collections::HashMap<&str, &LayoutElement> =
        elements.iter().map(|e| (e.element_id.as_str(), e)).collect();
    let mut sorted_order = order.to_vec();
    sorted_order.sort_by_key(|o| o.order_index);

    let mut out = Vec::with_capacity(elements.len());
    for o in &sorted_order {
        if let Some(e) = by_id.remove(o.element_id.as_str()) {
            out.push(e.clone());
        }
    }
    // Any element the order omitted (shouldn't normally happen) is appended
    // in its original position rather than silently dropped.
    for e in elements {
        if by_id.contains_key(e.element_id.as_str()) {
            out.push(e.clone());
        }
    }
    out
}

/// Crop `bbox` out of `page_image` and encode it as PNG bytes.
fn crop_to_png(page_image: &DynamicImage, bbox: &BoundingBox) -> Result<Vec<u8>, String> {
    let x = bbox.x.max(0.0) as u32;
    let y = bbox.y.max(0.0) as u32;
    let w = (bbox.width as u32).max(1).min(page_image.width().saturating_sub(x).max(1));
    let h = (bbox.height as u32).max(1).min(page_image.height().saturating_sub(y).max(1));

    let cropped = page_image.crop_imm(x, y, w, h);
    let mut buf = Vec::new();
    cropped
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| format!("png encode failed: {e}"))?;
    Ok(buf)
}

/// Crop, save to `images_dir/{element_id}.png`, and build both the
/// [`ImageInfo`] record and the HTML snippet that replaces the element in
/// the assembled Markdown (4.G step 2, grounded in `content_parser.py`'s
/// `<div style="text-align:center;"><img src="..." style="zoom:50%;" /></div>`
/// wrapper).
fn save_element_image(
    page_num: usize,
    page_image: &DynamicImage,
    element: &LayoutElement,
    images_dir: &Path,
) -> Result<(ImageInfo, String), String> {
    let png_bytes = crop_to_png(page_image, &element.bbox)?;

    std::fs::create_dir_all(images_dir).map_err(|e| format!("failed to create images dir: {e}"))?;
    let file_name = format!("{}.png", element.element_id);
    let path = images_dir.join(&file_name);
    std::fs::write(&path, &png_bytes).map_err(|e| format!("failed to write {:?}: {e}", path))?;

    let saved_path = format!("images/{file_name}");
    let image_info = ImageInfo {
        element_id: element.element_id.clone(),
        original_bbox: element.bbox,
        saved_path: saved_path.clone(),
        width: element.bbox.width as u32,
        height: element.bbox.height as u32,
        format: "png".to_string(),
        file_size: png_bytes.len() as u64,
    };

    let snippet = format!(
        r#"<div style="text-align:center;"><img src="{saved_path}" style="zoom:50%;" /></div>"#
    );

    debug!("page {page_num}: saved element {} to {saved_path}", element.element_id);
    Ok((image_info, snippet))
}

/// Merge line-end hyphenation splits in `text` (4.G step 3).
///
/// A direct port of `_process_hyphenated_text`: if no line ends in `-`,
/// `text` is returned unchanged. Otherwise, every hyphen-ending line is
/// merged with the next line's first word unless the character before the
/// hyphen looks like a digit or math/reference punctuation, or the next
/// line's first character isn't a letter or apostrophe (both signal the
/// hyphen wasn't actually splitting a word). The merged lines are then
/// rejoined with single spaces into one paragraph, discarding the original
/// line breaks — the reference's behaviour, kept rather than "fixed".
pub fn repair_hyphenated_text(text: &str) -> String {
    let has_hyphen_break =
        text.contains("-\n") || text.lines().any(|l| l.ends_with('-'));
    if !has_hyphen_break {
        return text.to_string();
    }

    let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
    let mut result_lines: Vec<String> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let current_line = lines[i].trim_end().to_string();

        if current_line.ends_with('-') && i + 1 < lines.len() {
            let next_line = lines[i + 1].trim_start().to_string();

            let mut skip_merge = false;
            if current_line.len() > 1 {
                let chars: Vec<char> = current_line.chars().collect();
                let char_before_hyphen = chars[chars.len() - 2];
                if char_before_hyphen.is_ascii_digit() || "\\${}[]()^_*".contains(char_before_hyphen) {
                    skip_merge = true;
                }
            }
            if !next_line.is_empty() && !skip_merge {
                let first_char = next_line.chars().next().unwrap();
                if !first_char.is_alphabetic() && first_char != '\'' {
                    skip_merge = true;
                }
            }

            if !skip_merge {
                let next_first_word = next_line.split(' ').next().unwrap_or("").to_string();
                let merged_line = format!("{}{}", &current_line[..current_line.len() - 1], next_first_word);
                result_lines.push(merged_line);

                let mut parts = next_line.splitn(2, ' ');
                let _first = parts.next();
                lines[i + 1] = parts.next().unwrap_or("").to_string();
            } else {
                result_lines.push(current_line);
            }
        } else {
            result_lines.push(current_line);
        }

        i += 1;
    }

    let non_empty: Vec<String> = result_lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
    non_empty.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementKind;

    fn layout_element(id: &str, kind: ElementKind) -> LayoutElement {
        LayoutElement {
            element_id: id.to_string(),
            kind,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, page_num: 0 },
            confidence: 0.9,
        }
    }

    #[test]
    fn repair_leaves_unhyphenated_text_untouched() {
        let text = "This is a normal sentence.\nAnother line.";
        assert_eq!(repair_hyphenated_text(text), text);
    }

    #[test]
    fn repair_merges_a_split_word() {
        let text = "This is an exam-\nple of hyphenation.";
        let out = repair_hyphenated_text(text);
        assert!(out.contains("example"));
        assert!(!out.contains("exam-"));
    }

    #[test]
    fn repair_skips_merge_when_hyphen_precedes_a_digit() {
        // "1-" before a newline looks like a numeric range, not a split word.
        let text = "See section 1-\n2 for details.";
        let out = repair_hyphenated_text(text);
        assert!(out.contains("1-"));
    }

    #[test]
    fn repair_skips_merge_when_next_line_starts_with_punctuation() {
        let text = "A trailing dash-\n(not a word).";
        let out = repair_hyphenated_text(text);
        assert!(out.contains("dash-"));
    }

    #[test]
    fn hyphenation_repair_applies_only_to_text_like_kinds() {
        assert!(uses_default_text_prompt(ElementKind::Text));
        assert!(uses_default_text_prompt(ElementKind::DocumentTitle));
        assert!(!uses_default_text_prompt(ElementKind::Table));
        assert!(!uses_default_text_prompt(ElementKind::CodeBlock));
        assert!(!uses_default_text_prompt(ElementKind::Algorithm));
        assert!(!uses_default_text_prompt(ElementKind::Toc));
    }

    #[test]
    fn order_elements_falls_back_to_detection_order_when_empty() {
        let elements = vec![layout_element("0-0", ElementKind::Text), layout_element("0-1", ElementKind::Text)];
        let ordered = order_elements(&elements, &[]);
        assert_eq!(ordered[0].element_id, "0-0");
        assert_eq!(ordered[1].element_id, "0-1");
    }

    #[test]
    fn order_elements_honours_reading_order_assignment() {
        let elements = vec![layout_element("0-0", ElementKind::Text), layout_element("0-1", ElementKind::Text)];
        let order = vec![
            ReadingOrderElement { element_id: "0-1".to_string(), order_index: 0, confidence: 0.9 },
            ReadingOrderElement { element_id: "0-0".to_string(), order_index: 1, confidence: 0.9 },
        ];
        let ordered = order_elements(&elements, &order);
        assert_eq!(ordered[0].element_id, "0-1");
        assert_eq!(ordered[1].element_id, "0-0");
    }

    #[test]
    fn image_snippet_matches_expected_html() {
        let info = ImageInfo {
            element_id: "0-0".to_string(),
            original_bbox: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, page_num: 0 },
            saved_path: "images/0-0.png".to_string(),
            width: 10,
            height: 10,
            format: "png".to_string(),
            file_size: 100,
        };
        let snippet = format!(
            r#"<div style="text-align:center;"><img src="{}" style="zoom:50%;" /></div>"#,
            info.saved_path
        );
        assert!(snippet.contains("images/0-0.png"));
        assert!(snippet.contains("zoom:50%;"));
    }
}
