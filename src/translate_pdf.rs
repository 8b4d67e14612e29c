//! Layout-preserving translator (component N's host pipeline): the second
//! control flow the crate exposes, sharing the Model Interface (4.B), the
//! Layout Detector (4.E), the Memory Manager (4.A), and the Rotation
//! Detector (4.C) with the Markdown pipeline in `convert.rs`.
//!
//! Control flow per page (§2): rasterize -> layout -> OCR per region ->
//! translate per region -> the Adaptive Layout Renderer (4.N) fits the
//! translated text back into each region -> compose the page image ->
//! stitch every page into one output PDF.

use crate::compose::{self, FontContext};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::layout::LayoutDetector;
use crate::layout_render::{fit_region, Region};
use crate::memory::MemoryManager;
use crate::model::{encode_image, ModelInterface, StageSettings};
use crate::preprocess;
use crate::prompts::content_prompt_for;
use crate::rotation::RotationDetector;
use crate::translator::Translator;
use crate::types::{BoundingBox, ContentBlock, LayoutElement};
use futures::stream::{self, StreamExt};
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A non-binding hint for one region, carried alongside the committed
/// render rather than feeding back into it (4.N supplement:
/// `suggest_font_adjustments`-style advice from `adaptive_layout.py`).
#[derive(Debug, Clone)]
pub struct RegionAdvice {
    pub element_id: String,
    /// Fraction of the page's area this region's bbox occupies.
    pub area_ratio: f64,
    /// `committed_font_size / source_font_size`; 1.0 means no shrink was needed.
    pub suggested_shrink: f64,
}

/// Every region-level advisory hint collected across the document, for
/// callers who want to pre-flag regions that needed aggressive shrinkage.
#[derive(Debug, Clone, Default)]
pub struct LayoutReport {
    pub regions: Vec<RegionAdvice>,
}

/// The result of rendering a whole translated PDF.
#[derive(Debug)]
pub struct TranslatedPdfResult {
    pub output_path: PathBuf,
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub report: LayoutReport,
}

struct PageRenderOutcome {
    page_num: usize,
    image: RgbaImage,
    advice: Vec<RegionAdvice>,
    failed: bool,
}

/// Render a translated version of `pdf_path`, preserving its original page
/// layout, and write it to `{output_dir}/{base_filename}-translated.pdf`.
pub async fn render_translated_pdf(
    pdf_path: &Path,
    password: Option<&str>,
    config: &PipelineConfig,
) -> Result<TranslatedPdfResult, PipelineError> {
    if !pdf_path.exists() {
        return Err(PipelineError::FileNotFound { path: pdf_path.to_path_buf() });
    }

    let model = ModelInterface::new(config)?;
    let memory = MemoryManager::new(config.memory_warning_threshold, config.memory_critical_threshold);
    memory.log_memory_status();
    let rotation_detector = RotationDetector::new(config.rotation_model_dir.clone(), config.rotation_use_gpu);

    let work_dir = config.output.output_dir.clone();
    std::fs::create_dir_all(&work_dir)
        .map_err(|e| PipelineError::OutputWriteFailed { path: work_dir.clone(), source: e })?;

    let (pages, images) =
        preprocess::preprocess_document(pdf_path, &work_dir, config.dpi, password, &rotation_detector).await?;

    let ocr_settings = StageSettings {
        model_name: config.content_model_name.clone(),
        backend: config.content_model_type,
        temperature: 0.0,
        max_tokens: 4096,
    };
    let translation_settings = StageSettings {
        model_name: config.translation_model_name.clone(),
        backend: config.translation_model_type,
        temperature: 0.2,
        max_tokens: 4096,
    };
    let translator = Translator::new(&model, translation_settings, config.target_language.clone());
    let font_ctx = FontContext::new();

    let gpu_permits = config.gpu_semaphore_size.max(1);

    let outcomes: Vec<PageRenderOutcome> = stream::iter(pages.iter().zip(images.iter()))
        .map(|(page, image)| {
            let model = &model;
            let translator = &translator;
            let font_ctx = &font_ctx;
            let ocr_settings = &ocr_settings;
            async move { render_one_page(page.page_num, image, model, ocr_settings, translator, font_ctx, config).await }
        })
        .buffer_unordered(gpu_permits)
        .collect()
        .await;

    let mut ordered: Vec<PageRenderOutcome> = outcomes;
    ordered.sort_by_key(|o| o.page_num);

    let pages_failed = ordered.iter().filter(|o| o.failed).count();
    let pages_processed = ordered.len() - pages_failed;
    let mut report = LayoutReport::default();
    let rasters: Vec<RgbaImage> = ordered
        .into_iter()
        .map(|o| {
            report.regions.extend(o.advice);
            o.image
        })
        .collect();

    let mut doc = compose::stitch_pages_to_pdf(&rasters, config.dpi)?;
    let output_path = work_dir.join(format!("{}-translated.pdf", config.output.base_filename));

    doc.save(&output_path)
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: output_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    info!(
        "render_translated_pdf: {} page(s), {pages_processed} succeeded, {pages_failed} failed -> {}",
        rasters.len(),
        output_path.display()
    );

    Ok(TranslatedPdfResult { output_path, pages_processed, pages_failed, report })
}

async fn render_one_page(
    page_num: usize,
    image: &DynamicImage,
    model: &ModelInterface,
    ocr_settings: &StageSettings,
    translator: &Translator<'_>,
    font_ctx: &FontContext,
    config: &PipelineConfig,
) -> PageRenderOutcome {
    let layout_detector = LayoutDetector::new(config.layout_model_dir.clone(), false, config.layout_confidence_threshold);
    let (width, height) = (image.width(), image.height());
    let layout = layout_detector.detect_page(page_num, width, height, Vec::new());

    if layout.is_empty() {
        return PageRenderOutcome { page_num, image: image.to_rgba8(), advice: Vec::new(), failed: false };
    }

    let translatable: Vec<&LayoutElement> =
        layout.iter().filter(|e| !e.kind.is_silently_dropped() && !e.kind.is_non_translatable()).collect();

    let mut ocr_requests = Vec::with_capacity(translatable.len());
    for element in &translatable {
        match crop_to_png(image, &element.bbox) {
            Ok(png) => ocr_requests.push((
                content_prompt_for(element.kind).to_string(),
                String::new(),
                vec![encode_image(&png)],
            )),
            Err(e) => warn!("page {page_num}: element {}: crop failed: {e}", element.element_id),
        }
    }

    let ocr_results = model.parallel_vision(ocr_requests, ocr_settings).await;

    let mut blocks = Vec::with_capacity(translatable.len());
    for (element, ocr) in translatable.iter().zip(ocr_results.into_iter()) {
        let raw_markdown = match ocr {
            Ok(text) => text,
            Err(e) => {
                warn!("page {page_num}: element {}: OCR failed: {}", element.element_id, e.detail);
                continue;
            }
        };
        blocks.push(ContentBlock {
            element_id: element.element_id.clone(),
            kind: element.kind,
            raw_markdown,
            trans_markdown: None,
            image_info: None,
            confidence: element.confidence,
        });
    }

    translator.translate(&mut blocks).await;

    let mut page_image = image.to_rgba8();
    let page_area = (width as f64 * height as f64).max(1.0);
    let mut advice = Vec::with_capacity(blocks.len());

    for block in &blocks {
        let Some(element) = translatable.iter().find(|e| e.element_id == block.element_id) else { continue };
        let trans_text = match &block.trans_markdown {
            Some(t) if !t.trim().is_empty() => t,
            _ => continue,
        };

        let bbox = element.bbox.clamped(width as f64, height as f64);
        let original_lines = (block.raw_markdown.lines().count()).max(1) as f64;
        let lh_ratio_estimate = 1.1;
        let source_font_size = (bbox.height / (original_lines * lh_ratio_estimate)).clamp(6.0, 96.0);

        let region = Region {
            x0: bbox.x,
            y0: bbox.y,
            x1: bbox.x + bbox.width,
            y1: bbox.y + bbox.height,
            source_font_size,
            language: config.target_language.clone(),
        };

        let plan = fit_region(&region, trans_text);

        compose::blank_region(&mut page_image, region.x0, region.y0, region.x1, region.y1);
        font_ctx.paint_region(&mut page_image, region.x0, region.y0, &plan, &region.language);

        advice.push(RegionAdvice {
            element_id: element.element_id.clone(),
            area_ratio: (bbox.width * bbox.height) / page_area,
            suggested_shrink: plan.font_size / source_font_size,
        });
    }

    PageRenderOutcome { page_num, image: page_image, advice, failed: false }
}

/// Crop `bbox` out of `page_image` and encode it as PNG bytes — the same
/// crop policy the Content Parser (4.G) uses, duplicated here rather than
/// shared because the Markdown pipeline and the translator are separate
/// entry points that only meet at the Model Interface (§2).
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelBackend;

    #[tokio::test]
    async fn missing_file_returns_file_not_found() {
        let config = PipelineConfig::builder()
            .content_model("local-vlm", ModelBackend::Local)
            .heading_model("local-text", ModelBackend::Local)
            .translation(true, "zh-CN")
            .translation_model("local-text", ModelBackend::Local)
            .build()
            .unwrap();
        let err = render_translated_pdf(Path::new("/nonexistent/does-not-exist.pdf"), None, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
