//! # edgequake-examcrop
//!
//! Turn a scanned or typeset exam PDF into one cropped image per question,
//! numbered in reading order across the whole document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    check the source file
//!  ├─ 2. Render   rasterise pages lazily via pdfium (spawn_blocking)
//!  ├─ 3. Detect   vision model proposes question boxes;
//!  │              equal strips when it cannot
//!  ├─ 4. Crop     clamp, cut and store q<n>_<uuid>.png per box
//!  └─ 5. Output   ordered questions with global numbers 1..=N + per-page stats
//! ```
//!
//! A page whose vision call fails, times out or returns nothing usable is
//! never an error: it is split into `questions_per_page` equal strips
//! instead, and the page summary records why.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_examcrop::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = ExtractionConfig::builder()
//!         .storage_root("public/questions")
//!         .remove_source_on_success(false)
//!         .build()?;
//!     let output = extract("mock-test-3.pdf", "Mock Test 3", &config).await?;
//!     for q in &output.questions {
//!         println!("{:>3}  {}", q.question_number, q.question_image_url);
//!     }
//!     eprintln!(
//!         "{} questions, {} of {} pages used the fallback",
//!         output.stats.total_questions, output.stats.fallback_pages, output.stats.total_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `examcrop` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{CropFailure, DetectionFailure, ExtractError};
pub use extract::{extract, extract_and_store, extract_sync, resolve_vision};
pub use output::{
    BoundingBox, CroppedQuestion, DetectedQuestion, DetectionMethod, ExtractionOutput,
    ExtractionStats, GroupId, PageSummary,
};
pub use pipeline::crop::QuestionStorage;
pub use pipeline::detect::{fallback_detect, BoundaryDetector, DetectionResult};
pub use pipeline::llm::{VisionError, VisionModel, VisionReply};
pub use pipeline::render::{PageImage, PageRenderer, PdfiumRenderer, Rasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{Manifest, ManifestStore, QuestionId, QuestionStore, StoredExtraction};
