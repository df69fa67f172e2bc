//! Question boundary detection: vision model first, equal strips second.
//!
//! [`BoundaryDetector::detect`] is the single decision point per page. It
//! always tries the vision model, and only when that path fails (call error,
//! timeout, unparseable reply, zero questions) does it switch to
//! [`fallback_detect`]. The outcome is a tagged [`DetectionResult`], so the
//! orchestrator never needs its own error handling for detection.

use crate::config::ExtractionConfig;
use crate::error::DetectionFailure;
use crate::output::{BoundingBox, DetectedQuestion, DetectionMethod};
use crate::pipeline::encode;
use crate::pipeline::llm::{call_with_retry, RetryPolicy, VisionModel};
use crate::pipeline::postprocess;
use crate::pipeline::render::PageImage;
use crate::prompts::{detection_prompt, DEFAULT_DETECTION_PROMPT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inset applied on every side of a fallback strip.
pub const FALLBACK_MARGIN_PX: u32 = 50;

/// Boxes for one page, tagged with the path that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    Primary(Vec<DetectedQuestion>),
    Fallback {
        questions: Vec<DetectedQuestion>,
        reason: DetectionFailure,
    },
}

impl DetectionResult {
    pub fn method(&self) -> DetectionMethod {
        match self {
            DetectionResult::Primary(_) => DetectionMethod::Primary,
            DetectionResult::Fallback { .. } => DetectionMethod::Fallback,
        }
    }

    pub fn questions(&self) -> &[DetectedQuestion] {
        match self {
            DetectionResult::Primary(questions) => questions,
            DetectionResult::Fallback { questions, .. } => questions,
        }
    }

    pub fn fallback_reason(&self) -> Option<&DetectionFailure> {
        match self {
            DetectionResult::Primary(_) => None,
            DetectionResult::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn into_questions(self) -> Vec<DetectedQuestion> {
        match self {
            DetectionResult::Primary(questions) => questions,
            DetectionResult::Fallback { questions, .. } => questions,
        }
    }
}

/// A page's detection result plus the tokens spent obtaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDetection {
    pub result: DetectionResult,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Proposes question bounding boxes for page images.
pub struct BoundaryDetector {
    model: Arc<dyn VisionModel>,
    prompt: String,
    policy: RetryPolicy,
    questions_per_page: u32,
}

impl BoundaryDetector {
    pub fn new(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            prompt: config
                .detection_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_DETECTION_PROMPT.to_string()),
            policy: RetryPolicy::from_config(config),
            questions_per_page: config.questions_per_page,
        }
    }

    /// Detect the questions on one page. Never fails.
    pub async fn detect(&self, page: &PageImage) -> PageDetection {
        let mut usage = (0, 0);
        let result = match self.detect_primary(page, &mut usage).await {
            Ok(questions) => {
                info!(
                    "Page {}: vision model found {} question(s)",
                    page.page_num,
                    questions.len()
                );
                DetectionResult::Primary(questions)
            }
            Err(reason) => {
                warn!(
                    "Page {}: vision detection failed ({}), using {} equal strips",
                    page.page_num, reason, self.questions_per_page
                );
                DetectionResult::Fallback {
                    questions: fallback_detect(page.width, page.height, self.questions_per_page),
                    reason,
                }
            }
        };

        PageDetection {
            result,
            input_tokens: usage.0,
            output_tokens: usage.1,
        }
    }

    /// The vision path alone. Zero detections count as a failure.
    async fn detect_primary(
        &self,
        page: &PageImage,
        usage: &mut (usize, usize),
    ) -> Result<Vec<DetectedQuestion>, DetectionFailure> {
        let png = tokio::fs::read(&page.path)
            .await
            .map_err(|e| DetectionFailure::PageUnreadable(e.to_string()))?;
        let image = encode::png_image_data(&png);
        let instruction = detection_prompt(&self.prompt, page.width, page.height);

        let (reply, retries) = call_with_retry(
            self.model.as_ref(),
            page.page_num,
            image,
            &instruction,
            &self.policy,
        )
        .await?;
        *usage = (reply.input_tokens, reply.output_tokens);
        debug!(
            "Page {}: reply of {} chars after {} retries",
            page.page_num,
            reply.content.len(),
            retries
        );

        let questions = postprocess::parse_detections(&reply.content)?;
        if questions.is_empty() {
            return Err(DetectionFailure::NoQuestions);
        }
        if let Some(unreadable) = all_malformed(&questions) {
            return Err(DetectionFailure::Parse(unreadable));
        }
        Ok(questions)
    }
}

// Only when no entry is usable; a partly malformed reply is still primary.
fn all_malformed(questions: &[DetectedQuestion]) -> Option<String> {
    if questions.iter().all(DetectedQuestion::is_malformed) {
        questions.first().and_then(|q| q.malformed.clone())
    } else {
        None
    }
}

/// Split a page into `questions_per_page` equal horizontal strips, numbered
/// top to bottom from 1.
///
/// Each strip is inset by [`FALLBACK_MARGIN_PX`] on all sides. On pages too
/// small for that margin it shrinks to a quarter of the strip (or page width)
/// so each box stays inside its strip.
pub fn fallback_detect(
    page_width: u32,
    page_height: u32,
    questions_per_page: u32,
) -> Vec<DetectedQuestion> {
    let n = questions_per_page.max(1);
    // Pages shorter than `n` pixels get 1px strips; the ones past the bottom
    // edge are skipped by the cropper.
    let strip = (page_height / n).max(1);
    let margin = FALLBACK_MARGIN_PX.min(strip / 4).min(page_width / 4);
    let width = page_width.saturating_sub(2 * margin).max(1);
    let height = strip - 2 * margin;

    (0..n)
        .map(|i| {
            DetectedQuestion::new(
                i + 1,
                BoundingBox::new(
                    margin as f64,
                    (i * strip + margin) as f64,
                    width as f64,
                    height as f64,
                ),
            )
        })
        .collect()
}
