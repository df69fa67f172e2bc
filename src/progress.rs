//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the document. Pages are processed
//! strictly in order, so events for page `n + 1` never precede
//! `on_page_complete` for page `n`.
//!
//! The page count is not known up front: the rasterizer is lazy and stops at
//! the first page that yields no image.

use crate::error::{CropFailure, DetectionFailure};
use crate::output::DetectionMethod;
use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first page is rasterised.
    fn on_extraction_start(&self, label: &str) {
        let _ = label;
    }

    /// Called after a page is rasterised, before detection.
    fn on_page_start(&self, page_num: usize) {
        let _ = page_num;
    }

    /// Called when the vision model failed for a page and the equal-strip
    /// fallback is used instead.
    fn on_page_fallback(&self, page_num: usize, reason: &DetectionFailure) {
        let _ = (page_num, reason);
    }

    /// Called for every box the cropper skipped.
    fn on_crop_skipped(&self, page_num: usize, failure: &CropFailure) {
        let _ = (page_num, failure);
    }

    /// Called once a page's crops are stored.
    fn on_page_complete(&self, page_num: usize, method: DetectionMethod, cropped: usize) {
        let _ = (page_num, method, cropped);
    }

    /// Called once after the last page, only on success.
    fn on_extraction_complete(&self, total_pages: usize, total_questions: usize) {
        let _ = (total_pages, total_questions);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
