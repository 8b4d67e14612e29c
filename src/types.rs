//! Core data model (§3): the entities that flow between pipeline stages.
//!
//! These are plain data, deliberately free of behaviour beyond small
//! invariant-preserving constructors — mirrors the Python reference's
//! `core/data_structures.py` dataclasses, adapted to Rust structs/enums.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A pixel-space rectangle on one page's rasterised image.
///
/// Invariant: `width > 0 && height > 0`. Use [`BoundingBox::clamped`] to
/// obtain a box guaranteed to satisfy the invariant and to lie within the
/// page bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub page_num: usize,
}

impl BoundingBox {
    /// Clamp this box inside `[0, page_width] x [0, page_height]`, ensuring
    /// the result has strictly positive width and height (floored at 1px).
    pub fn clamped(&self, page_width: f64, page_height: f64) -> BoundingBox {
        let x0 = self.x.max(0.0).min(page_width);
        let y0 = self.y.max(0.0).min(page_height);
        let x1 = (self.x + self.width).max(0.0).min(page_width);
        let y1 = (self.y + self.height).max(0.0).min(page_height);
        BoundingBox {
            x: x0,
            y: y0,
            width: (x1 - x0).max(1.0),
            height: (y1 - y0).max(1.0),
            page_num: self.page_num,
        }
    }
}

/// Closed enumeration of the kinds a detected layout region can carry.
///
/// This is the authoritative set (§3); the layout detector (4.E) maps
/// whatever native category strings its model emits onto this enum through
/// a fixed table, dropping anything unrecognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    DocumentTitle,
    ParagraphTitle,
    Text,
    Abstract,
    Toc,
    Reference,
    Footnote,
    Header,
    Footer,
    PageNumber,
    AsideText,
    Image,
    Chart,
    Table,
    FigureCaption,
    TableCaption,
    ChartCaption,
    ChemicalFormula,
    Algorithm,
    CodeBlock,
}

impl ElementKind {
    /// Kinds that the Content Parser (4.G step 1) drops silently, counting
    /// them as successes rather than content blocks.
    pub fn is_silently_dropped(&self) -> bool {
        matches!(self, ElementKind::Header | ElementKind::Footer | ElementKind::PageNumber)
    }

    /// Kinds that are always saved as a cropped image (4.G step 2),
    /// independent of the `table_as_image` policy.
    pub fn is_always_image(&self) -> bool {
        matches!(self, ElementKind::Image | ElementKind::Chart | ElementKind::ChemicalFormula)
    }

    /// Kinds the Translator (4.K) passes through untranslated.
    pub fn is_non_translatable(&self) -> bool {
        matches!(self, ElementKind::Image | ElementKind::Chart)
    }

    /// Kinds eligible to become a `document_title`/`paragraph_title` input
    /// to the Heading-Level Analyzer (4.J).
    pub fn is_heading_candidate(&self) -> bool {
        matches!(self, ElementKind::DocumentTitle | ElementKind::ParagraphTitle)
    }
}

/// One rasterised PDF page plus its detected rotation/language.
///
/// Created by the Preprocessor (4.D); `rotation` may be mutated in place by
/// the Rotation Detector (4.C). Never destroyed before the Output Manager
/// (4.M) completes, since downstream stages reference `image_path`.
#[derive(Debug, Clone)]
pub struct PDFPage {
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub rotation: u16,
    pub detected_language: Option<String>,
    pub image_path: PathBuf,
}

/// A typed bounding box produced by the Layout Detector (4.E).
///
/// `element_id` is globally unique and lexicographically orderable by
/// `(page_num, index)` — see [`LayoutElement::parse_element_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutElement {
    pub element_id: String,
    pub kind: ElementKind,
    pub bbox: BoundingBox,
    pub confidence: f64,
}

impl LayoutElement {
    pub fn make_id(page_num: usize, index: usize) -> String {
        format!("{page_num}-{index}")
    }

    /// Parse an `element_id` of the form `"{page_num}-{index}"` back into
    /// its `(page_num, index)` integer tuple, used for global ordering
    /// (§4.L: "images are additionally guaranteed to be in global
    /// `element_id` order").
    pub fn parse_element_id(id: &str) -> Option<(usize, usize)> {
        let (a, b) = id.split_once('-')?;
        Some((a.parse().ok()?, b.parse().ok()?))
    }
}

/// One page's reading-order assignment for a single element (4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingOrderElement {
    pub element_id: String,
    pub order_index: usize,
    pub confidence: f64,
}

/// Metadata about an element saved as an image file (4.G step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub element_id: String,
    pub original_bbox: BoundingBox,
    /// Always under `"images/"`, repo-relative, forward slashes.
    pub saved_path: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub file_size: u64,
}

/// One kept element, after content parsing (4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub element_id: String,
    pub kind: ElementKind,
    pub raw_markdown: String,
    pub trans_markdown: Option<String>,
    pub image_info: Option<ImageInfo>,
    pub confidence: f64,
}

/// A heading's original and LLM-reassigned semantic levels (4.J).
///
/// `semantic_level = 0` demotes an "apparent heading" to body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingLevel {
    pub element_id: String,
    pub original_level: u8,
    pub semantic_level: u8,
    pub confidence: f64,
}

/// The fully assembled document (4.L), ready for the Output Manager.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub detected_language: String,
    pub total_pages: usize,
    pub ordered_content_blocks: Vec<ContentBlock>,
    pub heading_levels: Vec<HeadingLevel>,
    pub images: Vec<ImageInfo>,
    pub translation_enabled: bool,
    pub target_language: Option<String>,
    pub total_elements: usize,
    pub successful_elements: usize,
    pub failed_elements: Vec<String>,
    pub total_processing_time_ms: u64,
}

/// Configuration for the Output Manager (4.M).
#[derive(Debug, Clone)]
pub struct OutputConfiguration {
    pub output_dir: PathBuf,
    pub base_filename: String,
    pub include_translation: bool,
    pub target_language: String,
    pub translated_only: bool,
    pub bilingual_output: bool,
    pub table_as_image: bool,
    pub debug_mode: bool,
    pub original_output_options: Vec<String>,
}

impl Default for OutputConfiguration {
    fn default() -> Self {
        OutputConfiguration {
            output_dir: PathBuf::from("."),
            base_filename: String::from("document"),
            include_translation: false,
            target_language: String::from("zh-CN"),
            translated_only: false,
            bilingual_output: true,
            table_as_image: false,
            debug_mode: false,
            original_output_options: Vec::new(),
        }
    }
}

/// Status of an asynchronous job, for the external HTTP surface (§6).
///
/// This crate does not implement the HTTP surface itself (out of scope,
/// §1) but `TaskRecord` is the shape that surface would serialize — kept
/// here so a thin web layer built on top of this crate has a ready-made
/// record type, process-local and not persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f32,
    pub message: String,
    pub created_at: String,
    pub filename: String,
    pub file_size: u64,
    pub result_file: Option<String>,
    pub error: Option<String>,
    pub processing_options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_clamps_inside_page() {
        let b = BoundingBox { x: -10.0, y: 5.0, width: 50.0, height: 20.0, page_num: 1 };
        let c = b.clamped(30.0, 30.0);
        assert_eq!(c.x, 0.0);
        assert!(c.width > 0.0);
        assert!(c.x + c.width <= 30.0 + 0.0001);
    }

    #[test]
    fn bbox_clamp_never_collapses_to_zero() {
        let b = BoundingBox { x: 100.0, y: 100.0, width: 5.0, height: 5.0, page_num: 1 };
        let c = b.clamped(10.0, 10.0);
        assert!(c.width >= 1.0);
        assert!(c.height >= 1.0);
    }

    #[test]
    fn element_id_roundtrip() {
        let id = LayoutElement::make_id(3, 7);
        assert_eq!(id, "3-7");
        assert_eq!(LayoutElement::parse_element_id(&id), Some((3, 7)));
    }

    #[test]
    fn silently_dropped_kinds() {
        assert!(ElementKind::Header.is_silently_dropped());
        assert!(ElementKind::Footer.is_silently_dropped());
        assert!(ElementKind::PageNumber.is_silently_dropped());
        assert!(!ElementKind::Text.is_silently_dropped());
    }
}
