//! # pdfweave
//!
//! Convert PDF documents to Markdown, and translate PDFs in place while
//! preserving their page layout, using Vision Language Models for the
//! document-understanding stages.
//!
//! ## Why this crate?
//!
//! Traditional PDF-to-text tools (pdftotext, pdf-extract) fail on complex
//! layouts — multi-column text, mathematical symbols, figures, and tables come
//! out garbled or out of reading order. This crate runs a full
//! document-understanding pipeline instead: layout detection, reading-order
//! recovery, and content transcription each get their own stage, driven by
//! local or hosted models behind a single [`model::ModelInterface`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ A. Memory     sample available memory, pick a scheduling strategy
//!  ├─ B. Model      route chat/vision calls to local or Docker-hosted backends
//!  ├─ C. Rotation   detect and correct page rotation
//!  ├─ D. Preprocess rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ E. Layout     detect structural elements per page
//!  ├─ F. Order      recover natural reading order
//!  ├─ G. Content    transcribe each element to Markdown (VLM)
//!  ├─ H. Page       compose E -> F -> G for one page
//!  ├─ I. Scheduler  fan pages out across workers under memory pressure
//!  ├─ J. Heading    normalise heading levels across the whole document
//!  ├─ K. Translator batch-translate content blocks (optional)
//!  ├─ L. Assembler  stitch per-page content into one ordered document
//!  ├─ M. Output     write Markdown (+ translated / bilingual variants)
//!  └─ N. Layout-render / compose  fit translated text back into page
//!        regions and restitch a translated PDF (layout-preserving mode)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfweave::{config::{ModelBackend, PipelineConfig}, convert::process_document};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .content_model("local-vlm", ModelBackend::Local)
//!         .heading_model("local-text", ModelBackend::Local)
//!         .build()?;
//!     let result = process_document(std::path::Path::new("document.pdf"), None, &config).await?;
//!     println!("wrote {} file(s)", result.output.files.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md` and `pdf-translate` binaries (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdfweave = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assembler;
pub mod compose;
pub mod config;
pub mod content_parser;
pub mod convert;
pub mod error;
pub mod heading;
pub mod input;
pub mod layout;
pub mod layout_render;
pub mod memory;
pub mod model;
pub mod output;
pub mod page;
pub mod preprocess;
pub mod prompts;
pub mod reading_order;
pub mod rotation;
pub mod scheduler;
pub mod translate_pdf;
pub mod translator;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ModelBackend, PipelineConfig, PipelineConfigBuilder};
pub use convert::{process_document, ConversionResult};
pub use error::{ElementError, PageError, PipelineError};
pub use input::{resolve_input, ResolvedInput};
pub use output::{ConversionStats, DocumentMetadata, OutputResult};
pub use translate_pdf::{render_translated_pdf, LayoutReport, RegionAdvice, TranslatedPdfResult};
pub use types::AssembledDocument;
