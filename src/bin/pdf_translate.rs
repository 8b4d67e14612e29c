//! CLI binary for pdfweave's layout-preserving PDF translator.
//!
//! Unlike `pdf2md`, which produces Markdown, this renders translated text
//! back into the source PDF's own page layout and emits a translated PDF.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfweave::config::ModelBackend;
use pdfweave::{input, PipelineConfig};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Translate a PDF into Chinese, preserving its layout
  pdf-translate document.pdf --to zh-CN

  # Choose where the translated PDF lands
  pdf-translate document.pdf --to ja -o out/ --name paper

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY   model provider credentials
  PDF2MD_PROVIDER   override provider (openai, anthropic, gemini, ollama)
"#;

/// Translate a PDF in place, preserving its original page layout.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-translate",
    version,
    about = "Translate a PDF while preserving its original page layout",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Target language for the translated PDF (e.g. zh-CN, ja, fr).
    #[arg(long = "to", env = "PDF_TRANSLATE_TARGET")]
    target_language: String,

    /// Directory to write the translated PDF into. Defaults to the input file's directory.
    #[arg(short, long, env = "PDF_TRANSLATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Base filename for the output PDF (without extension). Defaults to the input's stem.
    #[arg(long)]
    name: Option<String>,

    /// Vision model ID used for per-region OCR.
    #[arg(long, env = "PDF_TRANSLATE_MODEL", default_value = "gpt-4.1-nano")]
    model: String,

    /// Text model ID used for translation. Defaults to `model`.
    #[arg(long, env = "PDF_TRANSLATE_TRANSLATION_MODEL")]
    translation_model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama. Auto-detected if unset.
    #[arg(long, env = "PDF2MD_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI.
    #[arg(long, env = "PDF_TRANSLATE_DPI", default_value_t = 300, value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Number of pages rendered concurrently, gated by the GPU-bound layout/OCR calls.
    #[arg(long, env = "PDF_TRANSLATE_GPU_SLOTS", default_value_t = 2)]
    gpu_slots: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF_TRANSLATE_PASSWORD")]
    password: Option<String>,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// HTTP download timeout in seconds, used when `input` is a URL.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    #[cfg(feature = "bundled")]
    {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_bundled())
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
    }

    let resolved = input::resolve_input(&cli.input, cli.download_timeout)
        .await
        .context("Failed to resolve input")?;
    let pdf_path = resolved.path().to_path_buf();

    let output_dir = cli
        .output
        .clone()
        .unwrap_or_else(|| pdf_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from(".")));
    let base_filename = cli.name.clone().unwrap_or_else(|| {
        pdf_path.file_stem().and_then(|s| s.to_str()).unwrap_or("document").to_string()
    });

    let translation_model = cli.translation_model.clone().unwrap_or_else(|| cli.model.clone());

    let mut output_config = pdfweave::types::OutputConfiguration {
        output_dir,
        base_filename,
        ..Default::default()
    };
    output_config.target_language = cli.target_language.clone();

    let mut builder = PipelineConfig::builder()
        .content_model(&cli.model, ModelBackend::DockerAi)
        .heading_model(&translation_model, ModelBackend::DockerAi)
        .translation(true, cli.target_language.clone())
        .translation_model(&translation_model, ModelBackend::DockerAi)
        .dpi(cli.dpi)
        .gpu_semaphore_size(cli.gpu_slots)
        .output(output_config);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }

    let config = builder.build().context("Invalid configuration")?;

    let show_progress = !cli.quiet && !cli.no_progress;
    let bar = if show_progress {
        let b = ProgressBar::new_spinner();
        b.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
        b.set_message("Translating…");
        b.enable_steady_tick(Duration::from_millis(80));
        Some(b)
    } else {
        None
    };

    let result = pdfweave::render_translated_pdf(&pdf_path, cli.password.as_deref(), &config)
        .await
        .context("Translation failed")?;

    if let Some(b) = bar {
        b.finish_and_clear();
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} page(s) rendered, {} failed  →  {}",
            if result.pages_failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&result.pages_processed.to_string()),
            result.pages_failed,
            result.output_path.display(),
        );
        let shrunk = result.report.regions.iter().filter(|r| r.suggested_shrink < 0.999).count();
        if shrunk > 0 {
            eprintln!("   {} {} region(s) needed font shrinkage to fit", dim("·"), shrunk);
        }
    }

    Ok(())
}
