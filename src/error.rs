//! Error types for the pipeline.
//!
//! Two distinct error shapes reflect two distinct failure modes, carried
//! over unchanged from the two-tier split the rest of this crate follows
//! throughout:
//!
//! * [`PipelineError`] — **Fatal**: the job cannot proceed at all. Covers
//!   `ConfigError` (bad configuration, caught at startup) and
//!   `ModelLoadError` escalated to all workers (every worker failed to load
//!   a required local model). Returned as `Err(PipelineError)` from the
//!   top-level `process_document`/`render_translated_pdf` entry points.
//!
//! * [`ElementError`] / [`PageError`] — **Non-fatal**: a single element or
//!   page failed but the rest of the document is fine. Recorded into
//!   `failed_elements[]` / a page's result rather than propagated, so one
//!   bad element never loses a whole document.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first page failure, log and continue, or collect all errors for a
//! post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors that abort a document job.
///
/// Element- and page-level failures use [`ElementError`] / [`PageError`]
/// and are recorded rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error(
        "PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf"
    )]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Config errors (§7 ConfigError) ──────────────────────────────────────
    /// Builder validation failed, or a required config key was missing/empty
    /// for a component configured to use the remote adapter (§6 validation
    /// rules: non-empty `base_url`/`api_key`/model names when remote).
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    // ── Model load errors (§7 ModelLoadError, escalated) ───────────────────
    /// A local model's files are missing or unreadable, and every worker in
    /// the pool failed to load it — there is no way to make progress.
    /// A ModelLoadError affecting only *some* workers instead degrades that
    /// page to a failure and is retried in the sequential fallback (4.I
    /// step 6); it never reaches this variant.
    #[error("Failed to load local model at '{path}' for stage '{stage}': {detail}")]
    ModelLoadFailedForAllWorkers {
        stage: String,
        path: PathBuf,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Quick fix — run the bundled setup script:\n\
  ./scripts/setup-pdfium.sh\n\n\
Or install manually:\n\
  macOS:   brew install pdfium-chromium  (or download from github.com/bblanchon/pdfium-binaries)\n\
  Linux:   Download from github.com/bblanchon/pdfium-binaries, place libpdfium.so next to the binary or in /usr/local/lib\n\
  Windows: Download pdfium.dll from github.com/bblanchon/pdfium-binaries, place next to pdf2md.exe\n\n\
Then set the library path:\n\
  macOS:   export DYLD_LIBRARY_PATH=$(pwd)\n\
  Linux:   export LD_LIBRARY_PATH=$(pwd)\n"
    )]
    PdfiumBindingFailed(String),

    // ── Job-level errors ─────────────────────────────────────────────────
    /// Every page failed after all retries (including the sequential
    /// fallback); output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Output errors (§7 OutputError, job-fatal case only) ────────────────
    /// The Output Manager (4.M) produced zero files. Per §7, `OutputError`
    /// marks the job failed only when no files were emitted at all;
    /// individual write failures with at least one surviving file are
    /// recorded in `OutputResult.errors` instead (non-fatal).
    #[error("Output writing failed for '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single layout element (§7 `ContentParseError`).
///
/// Recorded in `ContentParsingResult.failed_elements` rather than
/// propagated; the page continues processing its remaining elements.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ElementError {
    /// The vision/text model call failed after retries for this element
    /// (§7 `ModelCallError`, converted to a per-element failure).
    #[error("Element {element_id}: model call failed after {retries} retries: {detail}")]
    ModelCallFailed {
        element_id: String,
        retries: u8,
        detail: String,
    },

    /// Cropping or saving the element's image representation failed.
    #[error("Element {element_id}: failed to save image to '{path}': {detail}")]
    ImageSaveFailed {
        element_id: String,
        path: String,
        detail: String,
    },

    /// The model's response could not be interpreted for this element kind
    /// (e.g. table parsing produced no rows).
    #[error("Element {element_id}: content parse error: {detail}")]
    ContentParseError { element_id: String, detail: String },
}

/// A non-fatal error for a single page (§7 `PageProcessingError`).
///
/// Encapsulates any exception raised while running 4.E → 4.F → 4.G for one
/// page. Triggers one in-thread retry in the scheduler (4.I step 5); if
/// still failing after the retry, the page is recorded with `None` results
/// rather than aborting the document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed (4.D).
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Layout detection failed for the whole page (4.E).
    #[error("Page {page}: layout detection failed: {detail}")]
    LayoutFailed { page: usize, detail: String },

    /// Reading-order analysis failed for the whole page (4.F). Per the
    /// spec's edge-case rule this is distinct from "no elements": it means
    /// the model call itself errored, not that the page was empty.
    #[error("Page {page}: reading-order analysis failed: {detail}")]
    OrderFailed { page: usize, detail: String },

    /// Content parsing failed for the whole page (4.G), as opposed to a
    /// single element (see [`ElementError::ContentParseError`]).
    #[error("Page {page}: content parsing failed: {detail}")]
    ContentFailed { page: usize, detail: String },

    /// A model call failed after retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    ModelCallFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// A model call timed out.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// Any other per-page exception, wrapped with the stage that raised it
    /// (Page Processor's "wraps per-stage exceptions with stage context").
    #[error("Page {page}: stage '{stage}' failed: {detail}")]
    StageFailed {
        page: usize,
        stage: String,
        detail: String,
    },
}

impl PageError {
    /// The page number this error pertains to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::LayoutFailed { page, .. }
            | PageError::OrderFailed { page, .. }
            | PageError::ContentFailed { page, .. }
            | PageError::ModelCallFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::StageFailed { page, .. } => *page,
        }
    }
}
