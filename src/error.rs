//! Error types for the edgequake-examcrop library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`ExtractError`] (**Fatal**): the run cannot produce a document at all
//!   (unreadable PDF, first page will not rasterise, storage unwritable,
//!   provider not configured). Returned as `Err(ExtractError)` from the
//!   top-level `extract*` functions and from the storage operations.
//!
//! * [`DetectionFailure`] (**Page-level, recovered**): the vision model could
//!   not produce usable boundaries for one page. The detector falls back to
//!   equal strips and the failure is kept only as the page's fallback reason.
//!
//! * [`CropFailure`] (**Box-level, recovered**): one bounding box could not be
//!   cropped. The box is skipped and the rest of the page continues.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-examcrop library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The first page could not be rasterised; the source is not a usable PDF.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened but produced no first page.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// Rasterisation or re-encoding failed for a page that had to succeed.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or install pdfium into a system\n\
library directory.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A file or directory in the question storage could not be written,
    /// read or removed.
    #[error("Storage operation failed on '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A replacement image buffer could not be decoded.
    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    /// A caller-supplied group id cannot be used as a storage namespace.
    #[error("Invalid group id '{0}'")]
    InvalidGroupId(String),

    /// The document store rejected the question batch.
    #[error("Document store failed: {0}")]
    StoreFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Why the primary (vision model) detection path was abandoned for a page.
///
/// Always recovered by the equal-strip fallback; never returned to callers
/// as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DetectionFailure {
    /// The inference call failed after all retries.
    #[error("vision call failed after {attempts} attempt(s): {detail}")]
    Inference { attempts: u32, detail: String },

    /// The inference call exceeded the per-call timeout on every attempt.
    #[error("vision call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The reply could not be parsed as the expected JSON shape.
    #[error("unparseable vision reply: {0}")]
    Parse(String),

    /// The reply parsed but listed no questions.
    #[error("vision reply contained no questions")]
    NoQuestions,

    /// The page image could not be read back for submission.
    #[error("page image unreadable: {0}")]
    PageUnreadable(String),
}

/// Why a single bounding box was skipped by the cropper.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum CropFailure {
    /// The detector's entry for this question could not be read as a box.
    #[error("question {question}: malformed box: {detail}")]
    Malformed { question: u32, detail: String },

    /// After clamping, the box covers no pixels of the page.
    #[error("question {question}: box lies outside the {page_width}x{page_height} page")]
    OutOfBounds {
        question: u32,
        page_width: u32,
        page_height: u32,
    },

    /// The cropped region could not be encoded.
    #[error("question {question}: encoding failed: {detail}")]
    Encode { question: u32, detail: String },

    /// The encoded crop could not be written to storage.
    #[error("question {question}: write failed: {detail}")]
    Write { question: u32, detail: String },
}

impl CropFailure {
    /// The (provisional) question number of the skipped box.
    pub fn question(&self) -> u32 {
        match self {
            CropFailure::Malformed { question, .. }
            | CropFailure::OutOfBounds { question, .. }
            | CropFailure::Encode { question, .. }
            | CropFailure::Write { question, .. } => *question,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterisation_failed_display() {
        let e = ExtractError::RasterisationFailed {
            page: 1,
            detail: "bad xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 1"), "got: {msg}");
        assert!(msg.contains("bad xref"));
    }

    #[test]
    fn storage_error_keeps_source() {
        use std::error::Error as _;
        let e = ExtractError::storage(
            "/tmp/q",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().contains("/tmp/q"));
        assert!(e.source().is_some());
    }

    #[test]
    fn timeout_display() {
        let e = DetectionFailure::Timeout { secs: 60 };
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn crop_failure_reports_question() {
        let e = CropFailure::OutOfBounds {
            question: 7,
            page_width: 100,
            page_height: 200,
        };
        assert_eq!(e.question(), 7);
        assert!(e.to_string().contains("100x200"));
    }
}
