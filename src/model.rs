//! Model Interface (4.B): the single seam every stage calls through to reach
//! an LLM, whether that's a remote OpenAI-style chat endpoint or (in
//! principle) an in-process local model.
//!
//! Grounded in the teacher's `pipeline/llm.rs`: the retry/backoff loop and
//! message layout here are the same shape, generalised from "one page to
//! Markdown" into four entry points — [`ModelInterface::chat`],
//! [`ModelInterface::vision`], and their `parallel_*` counterparts — so the
//! heading analyzer, translator, and content parser can all share one
//! client and one concurrency budget instead of each hand-rolling retries.

use crate::config::{ModelBackend, PipelineConfig};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Strips a ```markdown / ``` fence the model sometimes wraps its answer in.
///
/// Grounded in the teacher's `pipeline/postprocess.rs::strip_markdown_fences`
/// — only this one rule survives into the new architecture; the other nine
/// belonged to the old single-page-to-document post-processing pipeline.
static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown)?\s*\n(.*?)\n```\s*$").unwrap()
});

fn strip_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(caps) = FENCE_RE.captures(trimmed) {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| trimmed.to_string())
    } else {
        trimmed.to_string()
    }
}

/// One named model stage's settings, resolved from [`PipelineConfig`] by the
/// caller (content/heading/translation each pick their own model name and
/// backend out of the shared config).
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub model_name: String,
    pub backend: ModelBackend,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Shared client every stage calls through (4.B).
///
/// Providers are constructed lazily, one per distinct model name, and
/// cached — `edgequake_llm::ProviderFactory::create_llm_provider` bakes the
/// model name into the provider at construction time, so content/heading/
/// translation stages (which may each name a different model) cannot share
/// a single provider instance the way they share this interface and its
/// concurrency budget.
pub struct ModelInterface {
    provider_name: String,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

/// A model call failed after exhausting all retries.
#[derive(Debug, Clone, thiserror::Error)]
#[error("model call failed after {retries} retries: {detail}")]
pub struct ModelCallError {
    pub retries: u32,
    pub detail: String,
}

impl ModelInterface {
    pub fn new(config: &PipelineConfig) -> Result<Self, crate::error::PipelineError> {
        let max_concurrent = config.max_concurrent.max(1);
        Ok(ModelInterface {
            provider_name: config.provider_name.clone(),
            providers: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Resolve (and cache) the provider for one model name (4.B).
    ///
    /// Follows the teacher's `resolve_provider` fallback chain, narrowed to
    /// the two steps relevant here: an explicit `provider_name` wins, else
    /// `ProviderFactory::from_env()` auto-detects from whichever API key is
    /// present in the environment.
    fn provider_for(&self, model_name: &str) -> Result<Arc<dyn LLMProvider>, ModelCallError> {
        if let Some(p) = self.providers.lock().unwrap().get(model_name) {
            return Ok(Arc::clone(p));
        }

        let provider = if !self.provider_name.trim().is_empty() {
            ProviderFactory::create_llm_provider(&self.provider_name, model_name)
                .map_err(|e| ModelCallError {
                    retries: 0,
                    detail: format!(
                        "failed to construct provider '{}' for model '{}': {e}",
                        self.provider_name, model_name
                    ),
                })?
        } else {
            let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| ModelCallError {
                retries: 0,
                detail: format!("no model provider could be auto-detected from environment: {e}"),
            })?;
            provider
        };

        self.providers
            .lock()
            .unwrap()
            .insert(model_name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Text-only chat call with retry/backoff (4.B). `system_prompt` and
    /// `user_text` become one system message and one user message.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_text: &str,
        settings: &StageSettings,
    ) -> Result<String, ModelCallError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(user_text, vec![]),
        ];
        self.call_with_retry(messages, settings).await
    }

    /// Vision call: one system message plus a user turn carrying `images`
    /// (4.B). Mirrors the teacher's `process_page` message layout — an empty
    /// user text is fine, since VLM APIs only require at least one user turn
    /// to answer and the images carry the actual content.
    pub async fn vision(
        &self,
        system_prompt: &str,
        user_text: &str,
        images: Vec<ImageData>,
        settings: &StageSettings,
    ) -> Result<String, ModelCallError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(user_text, images),
        ];
        self.call_with_retry(messages, settings).await
    }

    /// Run `chat` over many `(system, user)` pairs concurrently, bounded by
    /// the shared semaphore (§5). Order of results matches order of inputs.
    pub async fn parallel_chat(
        &self,
        requests: Vec<(String, String)>,
        settings: &StageSettings,
    ) -> Vec<Result<String, ModelCallError>> {
        stream::iter(requests)
            .map(|(sys, user)| async move { self.chat(&sys, &user, settings).await })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    /// Run `vision` over many `(system, user, images)` triples concurrently,
    /// bounded by the shared semaphore (§5).
    pub async fn parallel_vision(
        &self,
        requests: Vec<(String, String, Vec<ImageData>)>,
        settings: &StageSettings,
    ) -> Vec<Result<String, ModelCallError>> {
        stream::iter(requests)
            .map(|(sys, user, imgs)| async move { self.vision(&sys, &user, imgs, settings).await })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    async fn call_with_retry(
        &self,
        messages: Vec<ChatMessage>,
        settings: &StageSettings,
    ) -> Result<String, ModelCallError> {
        let _permit = self.semaphore.acquire().await.map_err(|e| ModelCallError {
            retries: 0,
            detail: format!("semaphore closed: {e}"),
        })?;

        let provider = self.provider_for(&settings.model_name)?;
        let options = CompletionOptions {
            temperature: Some(settings.temperature),
            max_tokens: Some(settings.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("model call: retry {}/{} after {}ms", attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "model call ok: {} prompt tokens, {} completion tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(strip_fence(&response.content));
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!("model call attempt {} failed: {}", attempt + 1, last_err);
                }
            }
        }

        Err(ModelCallError {
            retries: self.max_retries,
            detail: last_err,
        })
    }
}

/// Base64-encode an RGB/RGBA image for a vision call, tagged with its MIME
/// type and requesting `"high"` detail (4.B — grounded in the teacher's
/// image-attachment construction for VLM calls).
pub fn encode_image(png_bytes: &[u8]) -> ImageData {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
    ImageData::new(encoded, "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let input = "```markdown\n# Title\n\nBody text\n```";
        assert_eq!(strip_fence(input), "# Title\n\nBody text");
    }

    #[test]
    fn strips_bare_fence_without_language_tag() {
        let input = "```\nplain text\n```";
        assert_eq!(strip_fence(input), "plain text");
    }

    #[test]
    fn leaves_unfenced_text_untouched() {
        let input = "# Title\n\nNo fence here.";
        assert_eq!(strip_fence(input), "# Title\n\nNo fence here.");
    }
}
