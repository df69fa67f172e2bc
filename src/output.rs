//! Data model shared by the pipeline stages and handed to callers.
//!
//! Only [`CroppedQuestion`] outlives a run; everything else describes how the
//! run went. Question records serialise in camelCase so they can be passed
//! straight to a document store that speaks the upload API's JSON shape.

use crate::error::{CropFailure, DetectionFailure, ExtractError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one extraction run, used as the storage namespace for its
/// question images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// A fresh random (UUID v4) group id.
    pub fn generate() -> Self {
        GroupId(uuid::Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied id.
    ///
    /// The id becomes a directory name, so it must be non-empty and must not
    /// contain path separators or parent-directory components.
    pub fn parse(s: impl Into<String>) -> Result<Self, ExtractError> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty()
            || trimmed == "."
            || trimmed.contains("..")
            || trimmed.contains('/')
            || trimmed.contains('\\')
        {
            return Err(ExtractError::InvalidGroupId(s));
        }
        Ok(GroupId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A question region in page pixel coordinates, as proposed by a detector.
///
/// Values come from a vision model and are untrusted: they may be negative,
/// fractional or extend past the page. [`BoundingBox::clamp_to`] turns them
/// into a valid [`PixelRect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Floor and clamp the box into `[0, page_width) × [0, page_height)`.
    ///
    /// Returns `None` when nothing of the box remains on the page, including
    /// non-finite coordinates and non-positive sizes.
    pub fn clamp_to(&self, page_width: u32, page_height: u32) -> Option<PixelRect> {
        let coords = [self.x, self.y, self.width, self.height];
        if coords.iter().any(|v| !v.is_finite()) || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }

        let (pw, ph) = (page_width as f64, page_height as f64);
        let left = self.x.floor().max(0.0);
        let top = self.y.floor().max(0.0);
        let right = (self.x + self.width).floor().min(pw);
        let bottom = (self.y + self.height).floor().min(ph);

        if left >= pw || top >= ph || right <= left || bottom <= top {
            return None;
        }

        Some(PixelRect {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// An integer rectangle guaranteed to lie inside its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One question proposed by the boundary detector.
///
/// `question_number` is page-local when it leaves the detector; the
/// orchestrator overwrites it with the run-global number before cropping.
///
/// A reply entry that could not be read as a box still occupies its slot,
/// with `bounding_box: None` and the reason in `malformed`. The cropper
/// skips it like any other bad box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedQuestion {
    pub question_number: u32,
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl DetectedQuestion {
    pub fn new(question_number: u32, bounding_box: BoundingBox) -> Self {
        Self {
            question_number,
            bounding_box: Some(bounding_box),
            malformed: None,
        }
    }

    pub fn malformed(question_number: u32, detail: impl Into<String>) -> Self {
        Self {
            question_number,
            bounding_box: None,
            malformed: Some(detail.into()),
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.bounding_box.is_none()
    }
}

/// A cropped and stored question image awaiting answer-key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CroppedQuestion {
    /// Global 1-based question number.
    pub question_number: u32,
    /// `<url_prefix>/<groupId>/<filename>`
    pub question_image_url: String,
    /// Always `None` when produced by the pipeline.
    pub correct_option: Option<String>,
}

/// Which detection path produced a page's boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Primary,
    Fallback,
}

/// Per-page record of how the page was processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub method: DetectionMethod,
    /// Set when `method` is `Fallback`.
    pub fallback_reason: Option<DetectionFailure>,
    /// Boxes handed to the cropper.
    pub detected: usize,
    /// Crops that were stored.
    pub cropped: usize,
    /// Boxes the cropper skipped.
    pub skipped: Vec<CropFailure>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub primary_pages: usize,
    pub fallback_pages: usize,
    pub total_questions: usize,
    pub skipped_boxes: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    pub(crate) fn from_pages(pages: &[PageSummary], total_duration_ms: u64) -> Self {
        let fallback_pages = pages
            .iter()
            .filter(|p| p.method == DetectionMethod::Fallback)
            .count();
        Self {
            total_pages: pages.len(),
            primary_pages: pages.len() - fallback_pages,
            fallback_pages,
            total_questions: pages.iter().map(|p| p.cropped).sum(),
            skipped_boxes: pages.iter().map(|p| p.skipped.len()).sum(),
            total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
            total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
            total_duration_ms,
        }
    }
}

/// Result of a successful extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub group_id: GroupId,
    /// Human-readable document label supplied at intake.
    pub label: String,
    /// Ordered questions with contiguous numbers `1..=N`.
    pub questions: Vec<CroppedQuestion>,
    pub pages: Vec<PageSummary>,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_floors_and_clips_negative_origin() {
        let b = BoundingBox::new(-10.7, 20.9, 50.2, 30.0);
        let r = b.clamp_to(100, 100).expect("overlaps page");
        assert_eq!(r, PixelRect { x: 0, y: 20, width: 39, height: 30 });
    }

    #[test]
    fn clamp_cuts_at_page_edge() {
        let b = BoundingBox::new(80.0, 90.0, 50.0, 50.0);
        let r = b.clamp_to(100, 100).unwrap();
        assert_eq!(r, PixelRect { x: 80, y: 90, width: 20, height: 10 });
    }

    #[test]
    fn clamp_rejects_boxes_off_the_page() {
        assert!(BoundingBox::new(150.0, 10.0, 20.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(-50.0, 10.0, 20.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(10.0, 10.0, 0.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(10.0, 10.0, -5.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(f64::NAN, 10.0, 5.0, 20.0).clamp_to(100, 100).is_none());
    }

    #[test]
    fn group_id_rejects_path_tricks() {
        assert!(GroupId::parse("").is_err());
        assert!(GroupId::parse("../etc").is_err());
        assert!(GroupId::parse("a/b").is_err());
        assert!(GroupId::parse("a\\b").is_err());
        assert_eq!(GroupId::parse(" abc-123 ").unwrap().as_str(), "abc-123");
    }

    #[test]
    fn generated_group_ids_differ() {
        assert_ne!(GroupId::generate(), GroupId::generate());
    }

    #[test]
    fn cropped_question_serialises_camel_case_with_null_option() {
        let q = CroppedQuestion {
            question_number: 3,
            question_image_url: "/questions/g/q3_x.png".into(),
            correct_option: None,
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["questionNumber"], 3);
        assert_eq!(v["questionImageUrl"], "/questions/g/q3_x.png");
        assert!(v["correctOption"].is_null());
    }
}
