//! CLI binary for pdfweave's PDF-to-Markdown pipeline.
//!
//! A thin shim over the library crate that maps CLI flags to
//! [`PipelineConfig`] and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfweave::config::ModelBackend;
use pdfweave::{input, PipelineConfig};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion, written next to the input file
  pdf2md document.pdf

  # Choose an output directory and base filename
  pdf2md document.pdf -o out/ --name report

  # Use a specific remote provider and model
  pdf2md --provider openai --model gpt-4.1 document.pdf

  # Convert from a URL
  pdf2md https://arxiv.org/pdf/1706.03762 -o attention/

  # Translate into Chinese alongside the original, bilingual output
  pdf2md document.pdf --translate zh-CN --bilingual

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY   model provider credentials
  PDF2MD_PROVIDER        override provider (openai, anthropic, gemini, ollama)
  PDFIUM_LIB_PATH        path to an existing libpdfium — skips auto-download
  PDFIUM_AUTO_CACHE_DIR  override the default pdfium cache directory
"#;

/// Convert PDF files and URLs to Markdown using a vision-model document pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert PDF files and URLs to Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Directory to write output files into. Defaults to the input file's directory.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Base filename for output files (without extension). Defaults to the input's stem.
    #[arg(long)]
    name: Option<String>,

    /// Vision model ID for the Content Parser stage.
    #[arg(long, env = "PDF2MD_MODEL", default_value = "gpt-4.1-nano")]
    model: String,

    /// Text model ID for the Heading-Level Analyzer stage. Defaults to `model`.
    #[arg(long, env = "PDF2MD_HEADING_MODEL")]
    heading_model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama. Auto-detected if unset.
    #[arg(long, env = "PDF2MD_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI.
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 300, value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Number of concurrent model calls.
    #[arg(short, long, env = "PDF2MD_CONCURRENCY", default_value_t = 15)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Translate content into this target language alongside the original (e.g. zh-CN).
    #[arg(long)]
    translate: Option<String>,

    /// Write translated and original side by side in one bilingual file.
    #[arg(long)]
    bilingual: bool,

    /// Write only the translated Markdown, dropping the original.
    #[arg(long)]
    translated_only: bool,

    /// Render tables as images instead of Markdown tables.
    #[arg(long)]
    table_as_image: bool,

    /// Retries per model call on failure.
    #[arg(long, env = "PDF2MD_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds, used when `input` is a URL.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
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
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.set_message("Connecting…");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
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

    let mut output_config = pdfweave::types::OutputConfiguration {
        output_dir,
        base_filename,
        include_translation: cli.translate.is_some(),
        bilingual_output: cli.bilingual,
        translated_only: cli.translated_only,
        table_as_image: cli.table_as_image,
        ..Default::default()
    };
    if let Some(ref target) = cli.translate {
        output_config.target_language = target.clone();
    }

    let heading_model = cli.heading_model.clone().unwrap_or_else(|| cli.model.clone());

    let mut builder = PipelineConfig::builder()
        .content_model(&cli.model, ModelBackend::DockerAi)
        .heading_model(&heading_model, ModelBackend::DockerAi)
        .dpi(cli.dpi)
        .max_concurrent(cli.concurrency)
        .max_retries(cli.max_retries)
        .table_as_image(cli.table_as_image)
        .output(output_config);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref target) = cli.translate {
        builder = builder
            .translation(true, target.clone())
            .translation_model(&heading_model, ModelBackend::DockerAi);
    }

    let config = builder.build().context("Invalid configuration")?;

    let show_progress = !cli.quiet && !cli.no_progress;
    let bar = if show_progress {
        let b = ProgressBar::new_spinner();
        b.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
        b.set_message("Converting…");
        b.enable_steady_tick(Duration::from_millis(80));
        Some(b)
    } else {
        None
    };

    let result = pdfweave::process_document(&pdf_path, cli.password.as_deref(), &config)
        .await
        .context("Conversion failed")?;

    if let Some(b) = bar {
        b.finish_and_clear();
    }

    if !cli.quiet {
        let stats = &result.stats;
        eprintln!(
            "{}  {}/{} pages  {}ms  →  {} file(s)",
            if stats.pages_failed == 0 { green("✔") } else { cyan("⚠") },
            stats.pages_succeeded,
            stats.total_pages,
            stats.total_processing_time_ms,
            bold(&result.output.files.len().to_string()),
        );
        for file in &result.output.files {
            eprintln!("   {} {}", dim("→"), file.display());
        }
        if stats.pages_failed > 0 {
            eprintln!("   {} {} page(s) failed", red("✗"), stats.pages_failed);
        }
    }

    Ok(())
}
