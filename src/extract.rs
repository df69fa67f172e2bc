//! Extraction entry points: the per-document orchestrator.
//!
//! One run owns one document, one scratch area and one fresh [`GroupId`].
//! Pages are handled strictly in order because global question numbers
//! depend on it:
//!
//! ```text
//! for page in rasterizer:          (lazy, stops at the first missing page)
//!     boxes   = detector.detect(page)          never fails
//!     numbers = counter + 1 ..                 provisional, pre-crop
//!     crops   = storage.crop_questions(...)    may skip boxes
//!     renumber crops contiguously, advance counter
//! rasterizer.cleanup()                         exactly once, success or not
//! ```
//!
//! Either the complete ordered question list is returned or the run fails
//! as a whole; on failure the group's images are deleted and the source PDF
//! is kept.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::{
    CroppedQuestion, DetectedQuestion, ExtractionOutput, ExtractionStats, GroupId, PageSummary,
};
use crate::pipeline::crop::QuestionStorage;
use crate::pipeline::detect::BoundaryDetector;
use crate::pipeline::input;
use crate::pipeline::llm::{ProviderVision, VisionModel};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer, Rasterizer};
use crate::store::{QuestionStore, StoredExtraction};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is picked without an explicit model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Extract every question of an exam PDF into cropped images.
///
/// # Arguments
/// * `pdf_path`: Local path of the source PDF
/// * `label`: Human-readable document name, carried into the output
/// * `config`: Extraction configuration
///
/// # Errors
/// Returns `Err(ExtractError)` only for fatal errors:
/// - File not found / permission denied
/// - First page does not rasterise (corrupt, encrypted, empty PDF)
/// - No vision provider configured
/// - Question storage not writable
///
/// Vision model failures are never fatal; those pages use the equal-strip
/// fallback (see [`crate::output::PageSummary::fallback_reason`]).
pub async fn extract(
    pdf_path: impl AsRef<Path>,
    label: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let (output, source) = run(pdf_path.as_ref(), label.as_ref(), config).await?;
    finish(&output, &source, config).await;
    Ok(output)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    pdf_path: impl AsRef<Path>,
    label: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(pdf_path, label, config))
}

/// Extract, then hand the ordered questions to `store`.
///
/// If the store rejects the batch, the run's images are deleted and the
/// source PDF is kept, exactly as for a failed extraction.
pub async fn extract_and_store(
    pdf_path: impl AsRef<Path>,
    label: impl AsRef<str>,
    config: &ExtractionConfig,
    store: &dyn QuestionStore,
) -> Result<StoredExtraction, ExtractError> {
    let label = label.as_ref();
    let (output, source) = run(pdf_path.as_ref(), label, config).await?;

    let saved = store
        .save_questions(
            &output.group_id,
            label,
            &output.questions,
            output.questions.len(),
        )
        .await;

    match saved {
        Ok(question_ids) => {
            finish(&output, &source, config).await;
            Ok(StoredExtraction {
                output,
                question_ids,
            })
        }
        Err(e) => {
            warn!("Store rejected group {}: {}", output.group_id, e);
            discard_group(&QuestionStorage::from_config(config), &output.group_id).await;
            Err(e)
        }
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the vision model, from most-specific to least-specific.
///
/// 1. **Pre-built model** (`config.vision`), used as-is.
/// 2. **Pre-built provider** (`config.provider`).
/// 3. **Named provider** (`config.provider_name`) with `config.model` or the
///    provider's default model.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **Gemini key** (`GEMINI_API_KEY`) with [`DEFAULT_MODEL`].
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_vision(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, ExtractError> {
    if let Some(ref vision) = config.vision {
        return Ok(Arc::clone(vision));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderVision::new(provider, config)))
}

fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("gemini", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "openai" | "azure" => "gpt-4.1-mini",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => DEFAULT_MODEL,
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    info!("Using vision provider '{}' with model '{}'", provider_name, model);
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_renderer(config: &ExtractionConfig) -> Arc<dyn PageRenderer> {
    match config.renderer {
        Some(ref renderer) => Arc::clone(renderer),
        None => Arc::new(PdfiumRenderer::from_config(config)),
    }
}

/// One complete run without source removal. Returns the output and the
/// resolved source path.
async fn run(
    pdf_path: &Path,
    label: &str,
    config: &ExtractionConfig,
) -> Result<(ExtractionOutput, PathBuf), ExtractError> {
    let total_start = Instant::now();
    let source = input::resolve_input(pdf_path)?;
    info!("Starting extraction of '{}' from {}", label, source.display());

    let detector = BoundaryDetector::new(resolve_vision(config)?, config);
    let storage = QuestionStorage::from_config(config);
    let group_id = GroupId::generate();
    debug!("Group id: {}", group_id);

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(label);
    }

    let mut rasterizer = Rasterizer::new(
        &source,
        resolve_renderer(config),
        config.scratch_dir.as_deref(),
    )?;
    let processed = process_pages(&mut rasterizer, &detector, &storage, &group_id, config).await;
    rasterizer.cleanup().await;

    let (questions, pages) = match processed {
        Ok(done) => done,
        Err(e) => {
            warn!("Extraction of '{}' failed: {}", label, e);
            discard_group(&storage, &group_id).await;
            return Err(e);
        }
    };

    let stats = ExtractionStats::from_pages(&pages, total_start.elapsed().as_millis() as u64);
    info!(
        "Extraction complete: {} question(s) from {} page(s) ({} fallback), {}ms",
        stats.total_questions, stats.total_pages, stats.fallback_pages, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(stats.total_pages, stats.total_questions);
    }

    Ok((
        ExtractionOutput {
            group_id,
            label: label.to_string(),
            questions,
            pages,
            stats,
        },
        source,
    ))
}

/// The sequential per-page loop. Any error aborts the whole run.
async fn process_pages(
    rasterizer: &mut Rasterizer,
    detector: &BoundaryDetector,
    storage: &QuestionStorage,
    group_id: &GroupId,
    config: &ExtractionConfig,
) -> Result<(Vec<CroppedQuestion>, Vec<PageSummary>), ExtractError> {
    let mut questions: Vec<CroppedQuestion> = Vec::new();
    let mut pages: Vec<PageSummary> = Vec::new();
    let mut counter: u32 = 0;

    while let Some(page) = rasterizer.next_page().await? {
        let page_start = Instant::now();
        let page_num = page.page_num;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num);
        }

        let detection = detector.detect(&page).await;
        let method = detection.result.method();
        let fallback_reason = detection.result.fallback_reason().cloned();
        if let (Some(cb), Some(reason)) = (&config.progress_callback, &fallback_reason) {
            cb.on_page_fallback(page_num, reason);
        }

        let detected = assign_global_numbers(detection.result.into_questions(), counter);
        let batch = storage.crop_questions(&page, &detected, group_id).await?;
        if let Some(ref cb) = config.progress_callback {
            for skipped in &batch.skipped {
                cb.on_crop_skipped(page_num, skipped);
            }
        }

        let cropped = renumber_contiguous(batch.cropped, &mut counter);
        debug!(
            "Page {}: {} detected, {} cropped, {} skipped; counter at {}",
            page_num,
            detected.len(),
            cropped.len(),
            batch.skipped.len(),
            counter
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(page_num, method, cropped.len());
        }

        pages.push(PageSummary {
            page_num,
            width: page.width,
            height: page.height,
            method,
            fallback_reason,
            detected: detected.len(),
            cropped: cropped.len(),
            skipped: batch.skipped,
            input_tokens: detection.input_tokens,
            output_tokens: detection.output_tokens,
            duration_ms: page_start.elapsed().as_millis() as u64,
        });
        questions.extend(cropped);
    }

    Ok((questions, pages))
}

/// Replace page-local numbers with provisional global ones: `base + 1`,
/// `base + 2`, … in detection order.
fn assign_global_numbers(questions: Vec<DetectedQuestion>, base: u32) -> Vec<DetectedQuestion> {
    questions
        .into_iter()
        .zip(base + 1..)
        .map(|(mut q, number)| {
            q.question_number = number;
            q
        })
        .collect()
}

/// Give the surviving crops the next numbers after `counter`, so skipped
/// boxes leave no gaps.
fn renumber_contiguous(cropped: Vec<CroppedQuestion>, counter: &mut u32) -> Vec<CroppedQuestion> {
    cropped
        .into_iter()
        .map(|mut q| {
            *counter += 1;
            q.question_number = *counter;
            q
        })
        .collect()
}

async fn discard_group(storage: &QuestionStorage, group_id: &GroupId) {
    if let Err(e) = storage.delete_group_images(group_id).await {
        warn!("Failed to discard images of group {}: {}", group_id, e);
    }
}

/// Post-success housekeeping: remove the source PDF when configured.
async fn finish(output: &ExtractionOutput, source: &Path, config: &ExtractionConfig) {
    if !config.remove_source_on_success {
        return;
    }
    match tokio::fs::remove_file(source).await {
        Ok(()) => debug!("Removed source {} of group {}", source.display(), output.group_id),
        Err(e) => warn!("Failed to remove source {}: {}", source.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BoundingBox;

    fn detected(n: usize) -> Vec<DetectedQuestion> {
        (1..=n as u32)
            .map(|i| DetectedQuestion::new(i, BoundingBox::new(0.0, 0.0, 10.0, 10.0)))
            .collect()
    }

    fn cropped(numbers: &[u32]) -> Vec<CroppedQuestion> {
        numbers
            .iter()
            .map(|n| CroppedQuestion {
                question_number: *n,
                question_image_url: format!("/questions/g/q{n}.png"),
                correct_option: None,
            })
            .collect()
    }

    #[test]
    fn global_numbers_continue_from_counter() {
        let qs = assign_global_numbers(detected(5), 3);
        let nums: Vec<u32> = qs.iter().map(|q| q.question_number).collect();
        assert_eq!(nums, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn renumbering_closes_gaps() {
        let mut counter = 3;
        // Provisional 5 was skipped by the cropper.
        let out = renumber_contiguous(cropped(&[4, 6, 7]), &mut counter);
        let nums: Vec<u32> = out.iter().map(|q| q.question_number).collect();
        assert_eq!(nums, vec![4, 5, 6]);
        assert_eq!(counter, 6);
        // Filenames keep their provisional number.
        assert_eq!(out[1].question_image_url, "/questions/g/q6.png");
    }

    #[test]
    fn default_models_per_provider() {
        assert_eq!(default_model_for("gemini"), DEFAULT_MODEL);
        assert_eq!(default_model_for("openai"), "gpt-4.1-mini");
        assert_eq!(default_model_for("anthropic"), "claude-sonnet-4-20250514");
    }

    #[tokio::test]
    async fn missing_file_is_fatal_before_provider_lookup() {
        let err = extract("/no/such/exam.pdf", "x", &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }
}
