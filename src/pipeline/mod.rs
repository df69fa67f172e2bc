//! Pipeline stages for exam-question extraction.
//!
//! Each submodule implements one step; the orchestrator in
//! [`crate::extract`] drives them page by page.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──────────────▶ crop
//! (path)    (pdfium)   (llm + postprocess,    (clamp, PNG,
//!                       or equal strips)       group storage)
//! ```
//!
//! 1. [`input`]: check the source PDF exists and is readable
//! 2. [`render`]: lazy page sequence on a scratch area; `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`detect`]: one decision point per page, vision model via [`llm`] and
//!    [`postprocess`], else [`detect::fallback_detect`]
//! 4. [`crop`]: cut each box out of the page and store it under the
//!    run's group id
//!
//! [`encode`] holds the PNG/base64 helpers shared by render, detect and crop.

pub mod crop;
pub mod detect;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
