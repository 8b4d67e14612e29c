//! Top-level pipeline orchestration (§5): wires the Preprocessor (4.D)
//! through the Output Manager (4.M) into one `process_document` entry
//! point.
//!
//! Grounded in the teacher's `convert.rs`, which played the same role for
//! the single-VLM pipeline: resolve input, run the stages in order, hand
//! back a result. The eight-stage pipeline's stage list is longer and the
//! middle stretch (E through G, run per page under the scheduler's
//! memory-adaptive batching) is parallel rather than sequential, but the
//! shape — preprocess, process, assemble, write — is unchanged.

use crate::assembler::{DocumentAssembler, PageContent};
use crate::config::PipelineConfig;
use crate::error::{ElementError, PipelineError};
use crate::heading::HeadingLevelAnalyzer;
use crate::memory::MemoryManager;
use crate::model::{ModelInterface, StageSettings};
use crate::output::{ConversionStats, DocumentMetadata, OutputManager, OutputResult};
use crate::preprocess::{self, classify_language, document_language_fallback, extract_metadata};
use crate::rotation::RotationDetector;
use crate::scheduler::{ParallelDocumentProcessor, SchedulerPageInput};
use crate::translator::Translator;
use crate::types::AssembledDocument;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Everything one end-to-end document job produced.
#[derive(Debug)]
pub struct ConversionResult {
    pub document: AssembledDocument,
    pub output: OutputResult,
    pub metadata: DocumentMetadata,
    pub stats: ConversionStats,
}

/// Run the full pipeline end-to-end for one PDF (§5):
/// D (preprocess) -> per page, under I's memory-adaptive scheduling, E -> F
/// -> G -> J (heading) -> K (translation, if enabled) -> L (assemble) -> M
/// (write).
pub async fn process_document(
    pdf_path: &Path,
    password: Option<&str>,
    config: &PipelineConfig,
) -> Result<ConversionResult, PipelineError> {
    let start = Instant::now();

    if !pdf_path.exists() {
        return Err(PipelineError::FileNotFound { path: pdf_path.to_path_buf() });
    }

    let metadata = extract_metadata(pdf_path, password).await.unwrap_or_default();

    let model = ModelInterface::new(config)?;
    let memory = MemoryManager::new(config.memory_warning_threshold, config.memory_critical_threshold);
    let rotation_detector = RotationDetector::new(config.rotation_model_dir.clone(), config.rotation_use_gpu);

    let work_dir = config.output.output_dir.clone();
    std::fs::create_dir_all(&work_dir)
        .map_err(|e| PipelineError::OutputWriteFailed { path: work_dir.clone(), source: e })?;

    let (pages, images) =
        preprocess::preprocess_document(pdf_path, &work_dir, config.dpi, password, &rotation_detector).await?;

    let images_dir = work_dir.join("images");

    let content_settings = StageSettings {
        model_name: config.content_model_name.clone(),
        backend: config.content_model_type,
        temperature: 0.2,
        max_tokens: 4096,
    };

    let scheduler = ParallelDocumentProcessor::new(memory, &model, config);
    let scheduler_inputs: Vec<SchedulerPageInput> = pages
        .iter()
        .zip(images.iter())
        .map(|(page, image)| SchedulerPageInput { page, image, raw_detections: Vec::new() })
        .collect();

    let outcomes = scheduler.process_document(scheduler_inputs, &images_dir, &content_settings).await;

    let total_pages = pages.len();
    let mut pages_failed = 0usize;
    let mut pages_retried = 0usize;
    let mut total_elements = 0usize;
    let mut failed_element_ids = Vec::new();
    let mut page_contents = Vec::with_capacity(total_pages);
    let mut page_languages: Vec<Option<String>> = Vec::with_capacity(total_pages);

    for outcome in outcomes {
        if outcome.retried {
            pages_retried += 1;
        }
        match outcome.result {
            Some(result) => {
                total_elements += result.layout.len();
                failed_element_ids.extend(result.content.failed_elements.iter().map(element_error_id));
                let page_text: String =
                    result.content.blocks.iter().map(|b| b.raw_markdown.as_str()).collect::<Vec<_>>().join(" ");
                page_languages.push(Some(classify_language(&page_text)));
                page_contents.push(PageContent { page_num: outcome.page_num, blocks: result.content.blocks });
            }
            None => {
                pages_failed += 1;
                page_languages.push(None);
            }
        }
    }

    if page_contents.is_empty() && total_pages > 0 {
        return Err(PipelineError::AllPagesFailed {
            total: total_pages,
            retries: 1,
            first_error: "every page failed scheduling and the sequential fallback".to_string(),
        });
    }

    let detected_language = document_language_fallback(&page_languages);

    let heading_settings = StageSettings {
        model_name: config.heading_model_name.clone(),
        backend: config.heading_model_type,
        temperature: 0.0,
        max_tokens: 2048,
    };
    let heading_analyzer = HeadingLevelAnalyzer::new(&model, heading_settings);
    let all_blocks: Vec<_> = page_contents.iter().flat_map(|p| p.blocks.iter().cloned()).collect();
    let heading_levels = heading_analyzer.analyze(&all_blocks).await;

    if config.translation_enabled {
        let translation_settings = StageSettings {
            model_name: config.translation_model_name.clone(),
            backend: config.translation_model_type,
            temperature: 0.2,
            max_tokens: 4096,
        };
        let translator = Translator::new(&model, translation_settings, config.target_language.clone());
        for page in page_contents.iter_mut() {
            translator.translate(&mut page.blocks).await;
        }
    }

    let total_processing_time_ms = start.elapsed().as_millis() as u64;

    let document = DocumentAssembler::assemble(
        page_contents,
        heading_levels,
        detected_language,
        config.translation_enabled,
        if config.translation_enabled { Some(config.target_language.clone()) } else { None },
        total_elements,
        failed_element_ids,
        total_processing_time_ms,
    );

    let output = OutputManager::write(&document, &config.output)?;

    let stats = ConversionStats {
        total_pages,
        pages_succeeded: total_pages - pages_failed,
        pages_retried,
        pages_failed,
        total_elements,
        successful_elements: document.successful_elements,
        failed_elements: document.failed_elements.len(),
        total_processing_time_ms,
    };

    info!(
        "process_document: {total_pages} page(s), {} succeeded, {pages_failed} failed, {} file(s) written in {total_processing_time_ms}ms",
        stats.pages_succeeded,
        output.files.len()
    );

    Ok(ConversionResult { document, output, metadata, stats })
}

fn element_error_id(e: &ElementError) -> String {
    match e {
        ElementError::ModelCallFailed { element_id, .. }
        | ElementError::ImageSaveFailed { element_id, .. }
        | ElementError::ContentParseError { element_id, .. } => element_id.clone(),
    }
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
            .build()
            .unwrap();
        let err = process_document(Path::new("/nonexistent/does-not-exist.pdf"), None, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
