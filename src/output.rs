//! Output Manager (4.M): writes the Markdown variant(s) an
//! [`OutputConfiguration`] asks for, copies referenced images, and reports
//! what happened.
//!
//! Also carries two reporting-only structs that exist purely for
//! diagnostics and the CLI, grounded in the teacher's `output.rs`:
//! [`DocumentMetadata`] (PDF-level metadata, read by [`crate::preprocess`])
//! and [`ConversionStats`] (per-document counters accumulated by the
//! scheduler (4.I) and this module).

use crate::error::PipelineError;
use crate::types::{AssembledDocument, ContentBlock, OutputConfiguration};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PDF-level metadata, unrelated to pipeline logic — surfaced to the CLI
/// and any caller that wants to report on the source document.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Per-document counters accumulated across the scheduler (4.I) and this
/// module — not part of any invariant, purely for reporting.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub pages_succeeded: usize,
    pub pages_retried: usize,
    pub pages_failed: usize,
    pub total_elements: usize,
    pub successful_elements: usize,
    pub failed_elements: usize,
    pub total_processing_time_ms: u64,
}

/// What the Output Manager actually did, for the caller to inspect or
/// surface to a user (4.M: "Returns an `OutputResult` recording files,
/// image paths, warnings, and errors").
#[derive(Debug, Clone, Default)]
pub struct OutputResult {
    pub files: Vec<PathBuf>,
    pub image_paths: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl OutputResult {
    /// Per §7 `OutputError`: the job is only fatal if *no* files were
    /// emitted at all; any write failure with at least one surviving file
    /// is recorded here instead.
    pub fn is_fatal(&self) -> bool {
        self.files.is_empty()
    }
}

/// Matches an HTML `<img src="...">` attribute or a Markdown `![alt](src)`
/// reference, used to detect every image reference a block of Markdown
/// carries (4.M "copies each referenced image into images/").
static IMG_SRC_RE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"(?:src="([^"]+)")|(?:!\[[^\]]*\]\(([^)]+)\))"#).unwrap()
});

/// Collect every `images/...`-relative path referenced by `markdown`.
pub fn image_references(markdown: &str) -> Vec<String> {
    IMG_SRC_RE
        .captures_iter(markdown)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .collect()
}

pub struct OutputManager;

impl OutputManager {
    /// Write every variant `config` asks for, copy referenced images, and
    /// produce the debug directory if requested (4.M).
    ///
    /// Images are expected to already live under `config.output_dir/images`
    /// (the Content Parser (4.G) writes them there directly); this pass is
    /// therefore normally a no-op existence check, made idempotent so a
    /// caller re-running the same job twice is safe (§8 round-trip
    /// property) — but it will also copy in an image found elsewhere on
    /// disk at the referenced relative path, which is why the check isn't
    /// skipped outright.
    pub fn write(doc: &AssembledDocument, config: &OutputConfiguration) -> Result<OutputResult, PipelineError> {
        let mut result = OutputResult::default();

        let images_dir = config.output_dir.join("images");
        std::fs::create_dir_all(&images_dir).map_err(|e| PipelineError::OutputWriteFailed {
            path: images_dir.clone(),
            source: e,
        })?;

        if config.debug_mode {
            let debug_dir = config.output_dir.join("debug");
            if let Err(e) = std::fs::create_dir_all(&debug_dir) {
                result.warnings.push(format!("failed to create debug dir {:?}: {e}", debug_dir));
            }
        }

        Self::copy_referenced_images(doc, config, &mut result);

        if !config.translated_only {
            let path = config.output_dir.join(format!("{}.md", config.base_filename));
            let markdown = render_markdown(doc, Variant::Original);
            match write_file(&path, &markdown) {
                Ok(()) => result.files.push(path),
                Err(e) => result.errors.push(e),
            }
        }

        if doc.translation_enabled {
            if config.translated_only || !config.bilingual_output {
                let path = config.output_dir.join(format!("{}-translated.md", config.base_filename));
                let markdown = render_markdown(doc, Variant::Translated);
                match write_file(&path, &markdown) {
                    Ok(()) => result.files.push(path),
                    Err(e) => result.errors.push(e),
                }
            }
            if config.bilingual_output {
                let path = config.output_dir.join(format!("{}-bilingual.md", config.base_filename));
                let markdown = render_markdown(doc, Variant::Bilingual);
                match write_file(&path, &markdown) {
                    Ok(()) => result.files.push(path),
                    Err(e) => result.errors.push(e),
                }
            }
        }

        if result.is_fatal() {
            warn!("Output Manager: no files emitted for {:?}", config.output_dir);
        } else {
            info!("Output Manager: wrote {} file(s) to {:?}", result.files.len(), config.output_dir);
        }

        Ok(result)
    }

    fn copy_referenced_images(doc: &AssembledDocument, config: &OutputConfiguration, result: &mut OutputResult) {
        let images_dir = config.output_dir.join("images");
        for image in &doc.images {
            let dest = config.output_dir.join(&image.saved_path);
            if dest.exists() {
                result.image_paths.push(dest);
                continue;
            }
            // The canonical source is wherever the Content Parser wrote it;
            // if it isn't already at `dest` (e.g. this document was
            // assembled against a different output_dir than it was parsed
            // into), look for it relative to the images dir by file name.
            let file_name = Path::new(&image.saved_path).file_name();
            if let Some(name) = file_name {
                let candidate = images_dir.join(name);
                if candidate.exists() && candidate != dest {
                    if let Err(e) = std::fs::copy(&candidate, &dest) {
                        result.warnings.push(format!("failed to copy image {:?}: {e}", candidate));
                        continue;
                    }
                }
            }
            if dest.exists() {
                result.image_paths.push(dest);
            } else {
                result.warnings.push(format!("referenced image missing on disk: {:?}", image.saved_path));
            }
        }
    }
}

enum Variant {
    Original,
    Translated,
    Bilingual,
}

fn render_markdown(doc: &AssembledDocument, variant: Variant) -> String {
    let mut out = String::new();
    for block in &doc.ordered_content_blocks {
        let rendered = match variant {
            Variant::Original => block.raw_markdown.clone(),
            Variant::Translated => block.trans_markdown.clone().unwrap_or_default(),
            Variant::Bilingual => {
                let translation = block.trans_markdown.clone().unwrap_or_default();
                if translation.trim().is_empty() {
                    block.raw_markdown.clone()
                } else {
                    format!("{}\n\n---\n\n{}", block.raw_markdown, translation)
                }
            }
        };

        if rendered.trim().is_empty() {
            debug!("skipping empty block {} ({variant_name})", block.element_id, variant_name = variant_name(&variant));
            continue;
        }

        out.push_str(rendered.trim_end());
        out.push_str("\n\n");
    }

    // Single trailing newline, no dangling blank lines at EOF.
    let trimmed = out.trim_end();
    let mut final_text = String::with_capacity(trimmed.len() + 1);
    final_text.push_str(trimmed);
    final_text.push('\n');
    final_text
}

fn variant_name(v: &Variant) -> &'static str {
    match v {
        Variant::Original => "original",
        Variant::Translated => "translated",
        Variant::Bilingual => "bilingual",
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), String> {
    std::fs::write(path, content).map_err(|e| format!("failed to write {:?}: {e}", path))
}

/// Normalize every image reference a [`ContentBlock`] carries so its
/// `img src`/`![]()` targets equal the block's own canonical
/// `images/{element_id}.png` path (4.L, performed by the Document
/// Assembler before the Output Manager ever sees the block).
pub fn normalize_image_reference(block: &mut ContentBlock) {
    let Some(info) = &block.image_info else { return };
    let canonical = &info.saved_path;

    let replaced = IMG_SRC_RE
        .replace_all(&block.raw_markdown, |caps: &regex::Captures| {
            if caps.get(1).is_some() {
                format!(r#"src="{canonical}""#)
            } else {
                let alt = &caps[0];
                let alt_text = alt
                    .find('[')
                    .and_then(|s| alt.find(']').map(|e| &alt[s + 1..e]))
                    .unwrap_or("");
                format!("![{alt_text}]({canonical})")
            }
        })
        .into_owned();
    block.raw_markdown = replaced;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, ElementKind, HeadingLevel, ImageInfo};
    use tempfile::TempDir;

    fn sample_doc(translation_enabled: bool) -> AssembledDocument {
        AssembledDocument {
            detected_language: "en".to_string(),
            total_pages: 1,
            ordered_content_blocks: vec![
                ContentBlock {
                    element_id: "0-0".to_string(),
                    kind: ElementKind::DocumentTitle,
                    raw_markdown: "# Title".to_string(),
                    trans_markdown: Some("# Titre".to_string()),
                    image_info: None,
                    confidence: 0.9,
                },
                ContentBlock {
                    element_id: "0-1".to_string(),
                    kind: ElementKind::Text,
                    raw_markdown: "Body text.".to_string(),
                    trans_markdown: Some(String::new()),
                    image_info: None,
                    confidence: 0.9,
                },
                ContentBlock {
                    element_id: "0-2".to_string(),
                    kind: ElementKind::Text,
                    raw_markdown: String::new(),
                    trans_markdown: None,
                    image_info: None,
                    confidence: 0.9,
                },
            ],
            heading_levels: vec![HeadingLevel {
                element_id: "0-0".to_string(),
                original_level: 1,
                semantic_level: 1,
                confidence: 0.9,
            }],
            images: Vec::new(),
            translation_enabled,
            target_language: if translation_enabled { Some("fr".to_string()) } else { None },
            total_elements: 3,
            successful_elements: 3,
            failed_elements: Vec::new(),
            total_processing_time_ms: 10,
        }
    }

    #[test]
    fn original_only_writes_one_file() {
        let tmp = TempDir::new().unwrap();
        let config = OutputConfiguration {
            output_dir: tmp.path().to_path_buf(),
            base_filename: "doc".to_string(),
            include_translation: false,
            target_language: "fr".to_string(),
            translated_only: false,
            bilingual_output: false,
            table_as_image: false,
            debug_mode: false,
            original_output_options: Vec::new(),
        };
        let doc = sample_doc(false);
        let result = OutputManager::write(&doc, &config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(!result.is_fatal());
        let content = std::fs::read_to_string(&result.files[0]).unwrap();
        assert!(content.contains("# Title"));
        assert!(!content.contains("Body text.\n\n\n"));
    }

    #[test]
    fn bilingual_interleaves_original_and_translation() {
        let tmp = TempDir::new().unwrap();
        let config = OutputConfiguration {
            output_dir: tmp.path().to_path_buf(),
            base_filename: "doc".to_string(),
            include_translation: true,
            target_language: "fr".to_string(),
            translated_only: false,
            bilingual_output: true,
            table_as_image: false,
            debug_mode: false,
            original_output_options: Vec::new(),
        };
        let doc = sample_doc(true);
        let result = OutputManager::write(&doc, &config).unwrap();
        // original.md + bilingual.md
        assert_eq!(result.files.len(), 2);
        let bilingual_path = result.files.iter().find(|p| p.to_string_lossy().contains("bilingual")).unwrap();
        let content = std::fs::read_to_string(bilingual_path).unwrap();
        assert!(content.contains("# Title"));
        assert!(content.contains("# Titre"));
        assert!(content.contains("---"));
    }

    #[test]
    fn translated_only_skips_original_file() {
        let tmp = TempDir::new().unwrap();
        let config = OutputConfiguration {
            output_dir: tmp.path().to_path_buf(),
            base_filename: "doc".to_string(),
            include_translation: true,
            target_language: "fr".to_string(),
            translated_only: true,
            bilingual_output: false,
            table_as_image: false,
            debug_mode: false,
            original_output_options: Vec::new(),
        };
        let doc = sample_doc(true);
        let result = OutputManager::write(&doc, &config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].to_string_lossy().contains("translated"));
    }

    #[test]
    fn empty_blocks_are_skipped_from_output() {
        let tmp = TempDir::new().unwrap();
        let config = OutputConfiguration {
            output_dir: tmp.path().to_path_buf(),
            base_filename: "doc".to_string(),
            ..OutputConfiguration::default()
        };
        let doc = sample_doc(false);
        let result = OutputManager::write(&doc, &config).unwrap();
        let content = std::fs::read_to_string(&result.files[0]).unwrap();
        // Third block had empty raw_markdown and must not appear.
        assert_eq!(content.matches("0-2").count(), 0);
    }

    #[test]
    fn image_references_finds_both_html_and_markdown_forms() {
        let md = r#"<img src="images/0-0.png"/> and ![cap](images/0-1.png)"#;
        let refs = image_references(md);
        assert_eq!(refs, vec!["images/0-0.png".to_string(), "images/0-1.png".to_string()]);
    }

    #[test]
    fn normalize_rewrites_img_src_to_canonical_path() {
        let mut block = ContentBlock {
            element_id: "0-0".to_string(),
            kind: ElementKind::Image,
            raw_markdown: r#"<div><img src="wrong/path.png" style="zoom:50%;"/></div>"#.to_string(),
            trans_markdown: None,
            image_info: Some(ImageInfo {
                element_id: "0-0".to_string(),
                original_bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, page_num: 0 },
                saved_path: "images/0-0.png".to_string(),
                width: 1,
                height: 1,
                format: "png".to_string(),
                file_size: 1,
            }),
            confidence: 0.9,
        };
        normalize_image_reference(&mut block);
        assert!(block.raw_markdown.contains(r#"src="images/0-0.png""#));
        assert!(!block.raw_markdown.contains("wrong/path.png"));
    }
}
