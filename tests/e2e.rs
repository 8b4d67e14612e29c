//! End-to-end integration tests for pdfweave.
//!
//! Most of these exercise the two public entry points —
//! [`pdfweave::process_document`] and [`pdfweave::render_translated_pdf`] —
//! against locally generated PDFs, with no layout/rotation/OCR model
//! directory configured. That is a deliberately real code path, not a
//! mock: every local-model stage (4.C, 4.E, 4.F) is documented in the
//! crate as falling back to "no detections" absent a configured model
//! directory (§8 "Page with 0 layout elements: empty page in output; no
//! error"), so these runs drive the full pipeline wiring — preprocessing,
//! scheduling, assembly, output — without needing model weights or a live
//! network endpoint.
//!
//! A second tier of tests, gated behind `E2E_ENABLED`, exercises the same
//! entry points against a real vision/text model endpoint and real
//! multi-element PDFs, the way the teacher crate's own `tests/e2e.rs` gates
//! its live-LLM tests. They're skipped by default since this repository
//! doesn't bundle model weights, test fixture PDFs, or API credentials.

use image::{Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};
use pdfweave::config::ModelBackend;
use pdfweave::{process_document, render_translated_pdf, PipelineConfig, PipelineError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ── Fixture: a minimal, valid N-page blank PDF ──────────────────────────────

/// Build a minimal valid PDF with `n` blank letter-sized pages and write it
/// to `dir/name`. No text, no images — just enough structure for pdfium to
/// load and rasterise, which is all these tests need: the layout-detection
/// stage (4.E) only has something to attach to `raw_detections` supplied by
/// a caller-provided model, and none of these tests supply any.
fn write_blank_pdf(dir: &Path, name: &str, n: usize) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(n);
    for _ in 0..n {
        let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), Vec::new()));
        let page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids.clone(),
        "Count" => kids.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let path = dir.join(name);
    doc.save(&path).expect("writing fixture PDF must succeed");
    path
}

fn local_only_config(output_dir: &Path) -> PipelineConfig {
    let mut output = pdfweave::types::OutputConfiguration::default();
    output.output_dir = output_dir.to_path_buf();
    output.base_filename = "doc".to_string();

    PipelineConfig::builder()
        .content_model("local-vlm", ModelBackend::Local)
        .heading_model("local-text", ModelBackend::Local)
        .max_workers(2)
        .output(output)
        .build()
        .expect("local-only config must build without credentials")
}

// ── process_document: offline, no configured layout/rotation model ─────────

#[tokio::test]
async fn process_document_writes_one_markdown_file_for_a_blank_page() {
    let tmp = TempDir::new().unwrap();
    let pdf = write_blank_pdf(tmp.path(), "blank.pdf", 1);
    let out_dir = tmp.path().join("out");
    let config = local_only_config(&out_dir);

    let result = process_document(&pdf, None, &config)
        .await
        .expect("a blank single-page PDF must not fail the pipeline");

    assert_eq!(result.document.total_pages, 1);
    assert_eq!(result.stats.pages_succeeded, 1);
    assert_eq!(result.stats.pages_failed, 0);
    // No layout model configured -> zero elements detected -> nothing to
    // assemble, but the Output Manager still writes the (empty) original
    // Markdown file (§8 "Page with 0 layout elements: empty page in
    // output; no error").
    assert_eq!(result.output.files.len(), 1);
    assert!(result.output.files[0].ends_with("doc.md"));
}

#[tokio::test]
async fn process_document_preserves_page_order_across_a_multi_page_document() {
    let tmp = TempDir::new().unwrap();
    let pdf = write_blank_pdf(tmp.path(), "multi.pdf", 5);
    let out_dir = tmp.path().join("out");
    let config = local_only_config(&out_dir);

    let result = process_document(&pdf, None, &config).await.expect("multi-page document must succeed");

    assert_eq!(result.document.total_pages, 5);
    assert_eq!(result.stats.pages_succeeded, 5);
    assert_eq!(result.stats.pages_failed, 0);
}

#[tokio::test]
async fn process_document_on_a_zero_page_pdf_still_completes() {
    // §8 boundary behaviour: "Empty document (0 pages): pipeline completes;
    // outputs empty Markdown; no images."
    let tmp = TempDir::new().unwrap();
    let pdf = write_blank_pdf(tmp.path(), "empty.pdf", 0);
    let out_dir = tmp.path().join("out");
    let config = local_only_config(&out_dir);

    let result = process_document(&pdf, None, &config).await.expect("a zero-page PDF must not error");

    assert_eq!(result.document.total_pages, 0);
    assert!(result.document.ordered_content_blocks.is_empty());
    assert!(result.document.images.is_empty());
}

#[tokio::test]
async fn process_document_missing_file_is_a_fatal_config_style_error() {
    let tmp = TempDir::new().unwrap();
    let config = local_only_config(&tmp.path().join("out"));

    let err = process_document(Path::new("/nonexistent/does-not-exist.pdf"), None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::FileNotFound { .. }));
}

/// §8 round-trip property: "Running Output Manager twice with the same
/// inputs yields byte-identical Markdown files." Running the whole pipeline
/// twice against the same input, into two separate output directories,
/// exercises that property end-to-end rather than just at the Output
/// Manager's own unit-test level.
#[tokio::test]
async fn process_document_is_deterministic_across_two_runs() {
    let tmp = TempDir::new().unwrap();
    let pdf = write_blank_pdf(tmp.path(), "repeat.pdf", 2);

    let config_a = local_only_config(&tmp.path().join("out-a"));
    let config_b = local_only_config(&tmp.path().join("out-b"));

    let result_a = process_document(&pdf, None, &config_a).await.unwrap();
    let result_b = process_document(&pdf, None, &config_b).await.unwrap();

    let md_a = std::fs::read_to_string(&result_a.output.files[0]).unwrap();
    let md_b = std::fs::read_to_string(&result_b.output.files[0]).unwrap();
    assert_eq!(md_a, md_b);
}

// ── render_translated_pdf: offline, no configured layout model ─────────────

#[tokio::test]
async fn render_translated_pdf_stitches_one_output_pdf_page_per_input_page() {
    let tmp = TempDir::new().unwrap();
    let pdf = write_blank_pdf(tmp.path(), "source.pdf", 3);
    let out_dir = tmp.path().join("out");
    let mut output = pdfweave::types::OutputConfiguration::default();
    output.output_dir = out_dir.clone();
    output.base_filename = "doc".to_string();

    let config = PipelineConfig::builder()
        .content_model("local-vlm", ModelBackend::Local)
        .heading_model("local-text", ModelBackend::Local)
        .translation(true, "zh-CN")
        .translation_model("local-text", ModelBackend::Local)
        .output(output)
        .build()
        .unwrap();

    let result = render_translated_pdf(&pdf, None, &config)
        .await
        .expect("rendering a translated PDF with no layout model configured must still succeed");

    assert_eq!(result.pages_processed, 3);
    assert_eq!(result.pages_failed, 0);
    assert!(result.output_path.exists());
    assert!(result.report.regions.is_empty(), "no layout elements detected -> no region advice");

    let written = Document::load(&result.output_path).expect("stitched output must be a valid PDF");
    assert_eq!(written.get_pages().len(), 3);
}

#[tokio::test]
async fn render_translated_pdf_missing_file_returns_file_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut output = pdfweave::types::OutputConfiguration::default();
    output.output_dir = tmp.path().join("out");

    let config = PipelineConfig::builder()
        .content_model("local-vlm", ModelBackend::Local)
        .heading_model("local-text", ModelBackend::Local)
        .translation(true, "zh-CN")
        .translation_model("local-text", ModelBackend::Local)
        .output(output)
        .build()
        .unwrap();

    let err = render_translated_pdf(Path::new("/nonexistent/does-not-exist.pdf"), None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::FileNotFound { .. }));
}

// ── Cross-component composition sanity (offline) ────────────────────────────

/// Drives [`pdfweave::compose`]'s page-stitching directly against a couple
/// of hand-painted rasters, the way the adaptive layout renderer's own
/// output feeds `stitch_pages_to_pdf` in `render_translated_pdf` — a
/// regression check for the page-count/MediaBox wiring one level above the
/// unit tests already living in `compose.rs`.
#[test]
fn stitched_pdf_page_count_matches_input_raster_count() {
    let pages: Vec<RgbaImage> = (0..4)
        .map(|_| RgbaImage::from_pixel(200, 300, Rgba([255, 255, 255, 255])))
        .collect();
    let doc = pdfweave::compose::stitch_pages_to_pdf(&pages, 150).expect("stitching must succeed");
    assert_eq!(doc.get_pages().len(), 4);
}

// ── Gated scenarios requiring a real model endpoint and real fixture PDFs ──
//
// These mirror the teacher's live-LLM test tier but are skipped unless
// E2E_ENABLED is set *and* the fixture PDF exists, matching §1's framing of
// the layout/OCR/reading-order/vision-LLM/translation-LLM models as
// external black-box capabilities this crate does not bundle.

fn skip_unless_ready(fixture: &str) -> Option<PathBuf> {
    if std::env::var("E2E_ENABLED").is_err() {
        eprintln!("SKIP — set E2E_ENABLED=1 to run live-model e2e tests");
        return None;
    }
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases").join(fixture);
    if !path.exists() {
        eprintln!("SKIP — fixture not found: {}", path.display());
        return None;
    }
    Some(path)
}

/// Scenario 1 of §8: a two-page paper with a title, body text, an image,
/// and a figure caption, run against a real remote vision model and a real
/// layout/reading-order model pair. Requires `E2E_ENABLED=1`, a
/// `test_cases/two_page_paper.pdf` fixture, `layout_model_dir`/
/// `order_model_dir` pointing at real weights, and model endpoint
/// credentials in the environment — none of which this repository ships.
#[tokio::test]
async fn live_two_page_paper_produces_title_heading_and_image_reference() {
    let Some(pdf) = skip_unless_ready("two_page_paper.pdf") else { return };

    let tmp = TempDir::new().unwrap();
    let mut output = pdfweave::types::OutputConfiguration::default();
    output.output_dir = tmp.path().to_path_buf();
    output.base_filename = "doc".to_string();

    let config = PipelineConfig::builder()
        .content_model("gpt-4o", ModelBackend::DockerAi)
        .heading_model("gpt-4o-mini", ModelBackend::DockerAi)
        .output(output)
        .build()
        .expect("valid config");

    let result = process_document(&pdf, None, &config).await.expect("live conversion should succeed");

    let md = std::fs::read_to_string(&result.output.files[0]).unwrap();
    assert!(md.lines().any(|l| l.starts_with("# ")), "expected a level-1 heading");
    assert!(md.contains("images/"), "expected at least one image reference");
}
