//! Pipeline configuration (§6): every knob the eight-stage pipeline and the
//! layout-preserving translator read, collected into one builder-validated
//! struct — mirrors the teacher's `ConversionConfigBuilder` (a twenty-field
//! constructor is unreadable and breaks on every new field).
//!
//! Validation happens in [`PipelineConfigBuilder::build`], returning
//! [`PipelineError::ConfigError`] rather than panicking, exactly as the
//! teacher's builder returns `Pdf2MdError::InvalidConfig`.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which inference adapter a stage uses (§6, §9 "interface polymorphism").
///
/// `Local` stages load model weights in-process and are not assumed
/// thread-safe — each worker owns its own instance (§4.I, §9 "concurrent
/// model instances"). `DockerAi` calls out to a remote OpenAI-style
/// endpoint via the Model Interface (4.B) and is freely shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    Local,
    DockerAi,
}

impl Default for ModelBackend {
    fn default() -> Self {
        ModelBackend::DockerAi
    }
}

/// Configuration for one end-to-end document job.
///
/// Built via [`PipelineConfig::builder()`]. Holds the model endpoint
/// credentials, per-stage backend selection, concurrency limits, memory
/// thresholds, local model asset paths, and the [`crate::types::OutputConfiguration`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // ── Model endpoint (§6) ────────────────────────────────────────────
    /// Named provider for remote stages (e.g. `"openai"`, `"anthropic"`,
    /// `"mistral"`), resolved through `edgequake_llm::ProviderFactory` —
    /// the API key itself is read from that provider's standard environment
    /// variable (`OPENAI_API_KEY`, ...), never stored in this struct.
    /// Empty means "auto-detect from environment" (§6, grounded in the
    /// teacher's `resolve_provider` fallback chain).
    pub provider_name: String,

    /// Global model-call parallelism for the Model Interface's shared
    /// executor (4.B `parallel_chat`/`parallel_vision`). Default: 15.
    pub max_concurrent: usize,

    pub content_model_name: String,
    pub heading_model_name: String,
    pub translation_model_name: String,

    pub content_model_type: ModelBackend,
    pub heading_model_type: ModelBackend,
    pub translation_model_type: ModelBackend,
    pub layout_model_type: ModelBackend,
    pub rotation_model_type: ModelBackend,

    /// Filesystem path to the rotation classifier's weights, used only when
    /// `rotation_model_type == Local`.
    pub rotation_model_dir: Option<PathBuf>,
    pub rotation_use_gpu: bool,
    /// Filesystem path to the layout detector's weights.
    pub layout_model_dir: Option<PathBuf>,
    /// Filesystem path to the reading-order model's weights.
    pub order_model_dir: Option<PathBuf>,

    // ── Preprocessing (4.D) ─────────────────────────────────────────────
    /// Rasterisation DPI. Default: 300 (§4.D).
    pub dpi: u32,

    // ── Memory Manager (4.A) ───────────────────────────────────────────
    pub memory_warning_threshold: f64,
    pub memory_critical_threshold: f64,

    // ── Parallel Document Processor (4.I) ──────────────────────────────
    /// Configured worker count; clamped to `min(configured, page_count)`
    /// at scheduling time (4.I step 1). Default: number of CPUs.
    pub max_workers: usize,

    // ── Layout Detector (4.E) ───────────────────────────────────────────
    pub layout_confidence_threshold: f64,

    // ── Content Parser (4.G) ────────────────────────────────────────────
    pub table_as_image: bool,

    // ── Translator (4.K) ─────────────────────────────────────────────────
    pub translation_enabled: bool,
    pub target_language: String,
    pub source_language: String,

    // ── Output Manager (4.M) ────────────────────────────────────────────
    pub output: crate::types::OutputConfiguration,

    /// Per-request HTTP timeout, seconds (§4.B). Default: 900.
    pub request_timeout_secs: u64,
    /// Retry attempts on a transient model call failure (§4.B). Default: 2.
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds, doubled per attempt. Default: 3000.
    pub retry_backoff_ms: u64,

    /// GPU-task semaphore size gating layout/OCR calls in the layout-preserving
    /// translator (§5, §4.N "Parallelism"). Default: 2.
    pub gpu_semaphore_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            provider_name: String::new(),
            max_concurrent: 15,
            content_model_name: String::new(),
            heading_model_name: String::new(),
            translation_model_name: String::new(),
            content_model_type: ModelBackend::DockerAi,
            heading_model_type: ModelBackend::DockerAi,
            translation_model_type: ModelBackend::DockerAi,
            layout_model_type: ModelBackend::Local,
            rotation_model_type: ModelBackend::Local,
            rotation_model_dir: None,
            rotation_use_gpu: false,
            layout_model_dir: None,
            order_model_dir: None,
            dpi: 300,
            memory_warning_threshold: 80.0,
            memory_critical_threshold: 90.0,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            layout_confidence_threshold: 0.5,
            table_as_image: false,
            translation_enabled: false,
            target_language: "zh-CN".to_string(),
            source_language: "en".to_string(),
            output: crate::types::OutputConfiguration::default(),
            request_timeout_secs: 900,
            max_retries: 2,
            retry_backoff_ms: 3000,
            gpu_semaphore_size: 2,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`]; see module docs for the design rationale.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    pub fn content_model(mut self, name: impl Into<String>, backend: ModelBackend) -> Self {
        self.config.content_model_name = name.into();
        self.config.content_model_type = backend;
        self
    }

    pub fn heading_model(mut self, name: impl Into<String>, backend: ModelBackend) -> Self {
        self.config.heading_model_name = name.into();
        self.config.heading_model_type = backend;
        self
    }

    pub fn translation_model(mut self, name: impl Into<String>, backend: ModelBackend) -> Self {
        self.config.translation_model_name = name.into();
        self.config.translation_model_type = backend;
        self
    }

    pub fn layout_model(mut self, dir: impl Into<PathBuf>, backend: ModelBackend) -> Self {
        self.config.layout_model_dir = Some(dir.into());
        self.config.layout_model_type = backend;
        self
    }

    pub fn rotation_model(mut self, dir: impl Into<PathBuf>, backend: ModelBackend, use_gpu: bool) -> Self {
        self.config.rotation_model_dir = Some(dir.into());
        self.config.rotation_model_type = backend;
        self.config.rotation_use_gpu = use_gpu;
        self
    }

    pub fn order_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.order_model_dir = Some(dir.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn memory_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.config.memory_warning_threshold = warning;
        self.config.memory_critical_threshold = critical;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn layout_confidence_threshold(mut self, t: f64) -> Self {
        self.config.layout_confidence_threshold = t;
        self
    }

    pub fn table_as_image(mut self, v: bool) -> Self {
        self.config.table_as_image = v;
        self
    }

    pub fn translation(mut self, enabled: bool, target_language: impl Into<String>) -> Self {
        self.config.translation_enabled = enabled;
        self.config.target_language = target_language.into();
        self
    }

    pub fn source_language(mut self, lang: impl Into<String>) -> Self {
        self.config.source_language = lang.into();
        self
    }

    pub fn output(mut self, output: crate::types::OutputConfiguration) -> Self {
        self.config.output = output;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn gpu_semaphore_size(mut self, n: usize) -> Self {
        self.config.gpu_semaphore_size = n.max(1);
        self
    }

    /// Validate and produce the final [`PipelineConfig`] (§6 validation rules).
    ///
    /// Positive `max_concurrent`; non-empty model names for every component
    /// configured to use the `docker_ai` (remote) adapter. `provider_name`
    /// may stay empty — that means "auto-detect from environment" per the
    /// teacher's `resolve_provider` fallback chain.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;

        if c.max_concurrent == 0 {
            return Err(PipelineError::ConfigError(
                "max_concurrent must be >= 1".into(),
            ));
        }

        if c.content_model_type == ModelBackend::DockerAi && c.content_model_name.trim().is_empty()
        {
            return Err(PipelineError::ConfigError(
                "content_model_name is required for a remote content stage".into(),
            ));
        }
        if c.heading_model_type == ModelBackend::DockerAi && c.heading_model_name.trim().is_empty()
        {
            return Err(PipelineError::ConfigError(
                "heading_model_name is required for a remote heading stage".into(),
            ));
        }
        if c.translation_enabled
            && c.translation_model_type == ModelBackend::DockerAi
            && c.translation_model_name.trim().is_empty()
        {
            return Err(PipelineError::ConfigError(
                "translation_model_name is required for a remote translation stage".into(),
            ));
        }

        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_rejects_remote_stage_missing_model_name() {
        // heading_model_type defaults to DockerAi with no model name set.
        let err = PipelineConfig::builder()
            .content_model("gpt-4o", ModelBackend::DockerAi)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn local_only_config_does_not_need_credentials() {
        let cfg = PipelineConfig::builder()
            .content_model("local-vlm", ModelBackend::Local)
            .heading_model("local-text", ModelBackend::Local)
            .build()
            .unwrap();
        assert_eq!(cfg.content_model_type, ModelBackend::Local);
    }

    #[test]
    fn remote_config_with_model_names_builds() {
        let cfg = PipelineConfig::builder()
            .provider_name("openai")
            .content_model("gpt-4o", ModelBackend::DockerAi)
            .heading_model("gpt-4o-mini", ModelBackend::DockerAi)
            .build()
            .unwrap();
        assert_eq!(cfg.provider_name, "openai");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = PipelineConfig::builder()
            .max_concurrent(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }
}
