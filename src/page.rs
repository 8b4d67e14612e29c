//! Page Processor (4.H): composes the Layout Detector (4.E), Reading-Order
//! Analyzer (4.F), and Content Parser (4.G) for a single page.
//!
//! Stages run strictly sequentially — layout must exist before reading
//! order can be computed, and reading order determines the sequence the
//! Content Parser walks elements in (§5: "Within a page, stages E, F, G
//! run strictly in that order on one thread"). A `PageProcessor` is
//! stateless across pages and owns its own `LayoutDetector` +
//! `ReadingOrderAnalyzer` instances, since local-model stages are not
//! assumed thread-safe (§9) — the scheduler (4.I) hands out one
//! `PageProcessor` per worker rather than sharing one across threads.

use crate::content_parser::{parse_page_content, ContentParsingResult};
use crate::error::PageError;
use crate::layout::{LayoutDetector, RawDetection};
use crate::model::{ModelInterface, StageSettings};
use crate::reading_order::ReadingOrderAnalyzer;
use crate::types::{LayoutElement, PDFPage, ReadingOrderElement};
use image::DynamicImage;
use std::path::Path;

/// Everything one page's `(layout, order, content)` triple needs, bundled
/// so the scheduler can hand it to a `PageProcessor` without re-threading
/// every argument individually.
pub struct PageInput<'a> {
    pub page: &'a PDFPage,
    pub image: &'a DynamicImage,
    pub raw_detections: Vec<RawDetection>,
}

/// The full result of processing one page, mirroring the three-way tuple
/// the Parallel Document Processor contract (4.I) promises per page.
#[derive(Debug, Default)]
pub struct PageProcessingResult {
    pub layout: Vec<LayoutElement>,
    pub order: Vec<ReadingOrderElement>,
    pub content: ContentParsingResult,
}

pub struct PageProcessor {
    layout: LayoutDetector,
    order: ReadingOrderAnalyzer,
}

impl PageProcessor {
    pub fn new(layout: LayoutDetector, order: ReadingOrderAnalyzer) -> Self {
        PageProcessor { layout, order }
    }

    /// Run E -> F -> G for one page. None of the three stages is fallible
    /// on its own: the Layout Detector and Reading-Order Analyzer fall back
    /// to empty results absent a configured model, and the Content Parser
    /// records per-element failures in `ContentParsingResult` rather than
    /// raising. `Result<_, PageError>` is kept on the signature as the
    /// scheduler's (4.I) contract for a page-level failure a future fallible
    /// stage could report — today this always returns `Ok`.
    pub async fn process(
        &self,
        input: PageInput<'_>,
        images_dir: &Path,
        model: &ModelInterface,
        content_settings: &StageSettings,
        config: &crate::config::PipelineConfig,
    ) -> Result<PageProcessingResult, PageError> {
        let page_num = input.page.page_num;

        let layout = self.layout.detect_page(page_num, input.page.width, input.page.height, input.raw_detections);

        let order = self.order.analyze_page_order(&layout, input.page.width, input.page.height);

        let content = parse_page_content(
            page_num,
            input.image,
            &layout,
            &order,
            images_dir,
            model,
            content_settings,
            config,
        )
        .await;

        Ok(PageProcessingResult { layout, order, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::model::ModelInterface;
    use crate::types::PDFPage;
    use std::path::PathBuf;

    #[tokio::test]
    async fn empty_page_produces_empty_triple_without_error() {
        let layout = LayoutDetector::new(None, false, 0.5);
        let order = ReadingOrderAnalyzer::new(None, false);
        let processor = PageProcessor::new(layout, order);

        let page = PDFPage {
            page_num: 0,
            width: 100,
            height: 100,
            dpi: 300,
            rotation: 0,
            detected_language: None,
            image_path: PathBuf::from("unused.png"),
        };
        let image = DynamicImage::new_rgb8(100, 100);
        let config = PipelineConfig::builder()
            .content_model("local-vlm", crate::config::ModelBackend::Local)
            .heading_model("local-text", crate::config::ModelBackend::Local)
            .build()
            .unwrap();
        let model = ModelInterface::new(&config).unwrap();
        let settings = StageSettings {
            model_name: "local-vlm".to_string(),
            backend: crate::config::ModelBackend::Local,
            temperature: 0.0,
            max_tokens: 100,
        };

        let tmp = tempfile::TempDir::new().unwrap();
        let result = processor
            .process(
                PageInput { page: &page, image: &image, raw_detections: Vec::new() },
                tmp.path(),
                &model,
                &settings,
                &config,
            )
            .await
            .unwrap();

        assert!(result.layout.is_empty());
        assert!(result.order.is_empty());
        assert!(result.content.blocks.is_empty());
        assert!(result.content.failed_elements.is_empty());
    }
}
