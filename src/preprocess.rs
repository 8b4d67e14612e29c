//! Preprocessor (4.D): rasterises each PDF page at a fixed DPI, runs the
//! Rotation Detector (4.C) over the raster, and classifies the page's
//! dominant language.
//!
//! Rasterisation is grounded in the teacher's `pipeline/render.rs` —
//! `spawn_blocking` wrapping a pdfium render call, since pdfium uses
//! thread-local state and is not safe to drive from an async context.
//! Unlike the teacher (which caps the longest edge in pixels for VLM
//! sizing), this preprocessor renders at a configured DPI (§4.D): document
//! fidelity for OCR/layout detection matters more here than staying inside
//! a vision-model tile budget.
//!
//! Language classification has no statistical model in this crate (no
//! corpus example vendors one); `classify_language` is a direct Unicode
//! script-ratio heuristic standing in for the reference's `langdetect` call,
//! sufficient to produce the same four buckets the rest of the pipeline
//! keys off: `zh-cn`, `zh-en-mixed`, a bare language code, or `unknown`.

use crate::error::{PageError, PipelineError};
use crate::rotation::RotationDetector;
use crate::types::PDFPage;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rasterise every page of `pdf_path` at `dpi`, writing `temp/page_{n}.png`
/// under `work_dir`, running rotation detection on each raster, and
/// returning one [`PDFPage`] per page plus the in-memory rasters (so callers
/// don't have to re-read the PNGs they were just written).
pub async fn preprocess_document(
    pdf_path: &Path,
    work_dir: &Path,
    dpi: u32,
    password: Option<&str>,
    rotation_detector: &RotationDetector,
) -> Result<(Vec<PDFPage>, Vec<DynamicImage>), PipelineError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());
    let work = work_dir.to_path_buf();

    let rendered = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || render_all_pages_blocking(&path, dpi, pwd.as_deref()))
            .await
            .map_err(|e| PipelineError::Internal(format!("render task panicked: {e}")))??
    };

    std::fs::create_dir_all(work.join("temp")).map_err(|e| PipelineError::OutputWriteFailed {
        path: work.join("temp"),
        source: e,
    })?;

    let mut pages = Vec::with_capacity(rendered.len());
    let mut images = Vec::with_capacity(rendered.len());

    for (idx, image) in rendered {
        let image_path = work.join("temp").join(format!("page_{idx}.png"));

        let (image, rotation) = match rotation_detector.detect(&image) {
            Some(detected) => {
                let applied = RotationDetector::apply(0, detected);
                let upright = RotationDetector::correct_image(&image, detected);
                debug!("page {idx}: rotation corrected to {applied} degrees");
                (upright, applied)
            }
            None => (image, 0),
        };

        image
            .save(&image_path)
            .map_err(|e| PipelineError::Internal(format!("failed to save page {idx}: {e}")))?;

        let detected_language = classify_language_from_image(&image);

        pages.push(PDFPage {
            page_num: idx,
            width: image.width(),
            height: image.height(),
            dpi,
            rotation,
            detected_language,
            image_path,
        });
        images.push(image);
    }

    if pages.is_empty() {
        warn!("preprocess_document: no pages produced for {:?}", pdf_path);
    } else {
        info!("preprocess_document: rasterised {} page(s) at {} dpi", pages.len(), dpi);
    }

    Ok((pages, images))
}

fn render_all_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    password: Option<&str>,
) -> Result<Vec<(usize, DynamicImage)>, PipelineError> {
    let pdfium = pdfium_auto::bind_pdfium_silent().map_err(|e| {
        PipelineError::PdfiumBindingFailed(e.to_string())
    })?;

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                PipelineError::WrongPassword { path: pdf_path.to_path_buf() }
            } else {
                PipelineError::PasswordRequired { path: pdf_path.to_path_buf() }
            }
        } else {
            PipelineError::CorruptPdf { path: pdf_path.to_path_buf(), detail: err_str }
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("pdf loaded: {total} page(s)");

    // pdfium render scale: 72pt base page size times dpi/72.
    let scale = dpi as f32 / 72.0;

    let mut results = Vec::with_capacity(total);
    for idx in 0..total {
        let page = pages.get(idx as u16).map_err(|e| PageError::RenderFailed {
            page: idx,
            detail: format!("{e:?}"),
        });
        let page = match page {
            Ok(p) => p,
            Err(err) => {
                warn!("page {idx}: {err}");
                continue;
            }
        };

        let target_width = (page.width().value * scale) as i32;
        let target_height = (page.height().value * scale) as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width.max(1))
            .set_target_height(target_height.max(1));

        let bitmap = match page.render_with_config(&render_config) {
            Ok(b) => b,
            Err(e) => {
                warn!("page {idx}: render failed: {e:?}");
                continue;
            }
        };

        results.push((idx, bitmap.as_image()));
    }

    Ok(results)
}

/// Extract document metadata without rasterising any pages, used by the
/// Output Manager (4.M) and CLI `inspect`-style entry points.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<crate::output::DocumentMetadata, PipelineError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());
    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| PipelineError::Internal(format!("metadata task panicked: {e}")))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<crate::output::DocumentMetadata, PipelineError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| PipelineError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| PipelineError::CorruptPdf { path: pdf_path.to_path_buf(), detail: format!("{e:?}") })?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() { None } else { Some(v) }
        })
    };

    Ok(crate::output::DocumentMetadata {
        title: get(PdfDocumentMetadataTagType::Title),
        author: get(PdfDocumentMetadataTagType::Author),
        subject: get(PdfDocumentMetadataTagType::Subject),
        creator: get(PdfDocumentMetadataTagType::Creator),
        producer: get(PdfDocumentMetadataTagType::Producer),
        creation_date: get(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get(PdfDocumentMetadataTagType::ModificationDate),
        page_count: pages.len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Script-ratio heuristic standing in for a statistical language detector.
/// Not exposed for images directly (OCR'ing the raster is the content
/// parser's job); see [`classify_language`] for the text-based form used
/// once page text is available.
fn classify_language_from_image(_image: &DynamicImage) -> Option<String> {
    // Orientation/rasterisation alone carries no text signal; language is
    // only known once content parsing has produced text for the page. This
    // returns `None` here and is backfilled via `classify_language` by the
    // assembler once page text exists (4.D's "document-level language
    // fallback" step).
    None
}

/// Classify `text`'s dominant language into the buckets the rest of the
/// pipeline keys off (4.D): `"zh-cn"` for text that reads as
/// overwhelmingly Han-script, `"zh-en-mixed"` when both Han and Latin
/// scripts appear in meaningful proportion, `"en"` (or another bare code)
/// for Latin-script text, else `"unknown"` for empty/unclassifiable input.
pub fn classify_language(text: &str) -> String {
    let mut han = 0usize;
    let mut latin = 0usize;
    let mut total_alpha = 0usize;

    for c in text.chars() {
        if c.is_alphabetic() {
            total_alpha += 1;
            let cp = c as u32;
            if (0x4E00..=0x9FFF).contains(&cp) || (0x3400..=0x4DBF).contains(&cp) {
                han += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
    }

    if total_alpha == 0 {
        return "unknown".to_string();
    }

    let han_ratio = han as f64 / total_alpha as f64;
    let latin_ratio = latin as f64 / total_alpha as f64;

    if han_ratio > 0.9 {
        "zh-cn".to_string()
    } else if han_ratio > 0.05 && latin_ratio > 0.05 {
        "zh-en-mixed".to_string()
    } else if latin_ratio > han_ratio {
        "en".to_string()
    } else if han_ratio > 0.0 {
        "zh-cn".to_string()
    } else {
        "unknown".to_string()
    }
}

/// Fall back to a document-level language when per-page detection produced
/// no usable signal (4.D "document-level language fallback"): the first
/// non-`"unknown"` page language wins, else `"unknown"`.
pub fn document_language_fallback(page_languages: &[Option<String>]) -> String {
    page_languages
        .iter()
        .flatten()
        .find(|lang| lang.as_str() != "unknown")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pure_chinese_as_zh_cn() {
        assert_eq!(classify_language("这是一个测试文档"), "zh-cn");
    }

    #[test]
    fn classifies_pure_english_as_en() {
        assert_eq!(classify_language("This is a test document"), "en");
    }

    #[test]
    fn classifies_mixed_script_as_zh_en_mixed() {
        assert_eq!(classify_language("这是 a mixed 文档 with English words"), "zh-en-mixed");
    }

    #[test]
    fn classifies_empty_text_as_unknown() {
        assert_eq!(classify_language(""), "unknown");
        assert_eq!(classify_language("123 456 !!!"), "unknown");
    }

    #[test]
    fn document_fallback_picks_first_known_language() {
        let langs = vec![None, Some("unknown".to_string()), Some("en".to_string())];
        assert_eq!(document_language_fallback(&langs), "en");
    }

    #[test]
    fn document_fallback_is_unknown_when_nothing_known() {
        let langs = vec![None, Some("unknown".to_string())];
        assert_eq!(document_language_fallback(&langs), "unknown");
    }
}
