//! PDF rasterisation: a lazy, finite sequence of page images on a scratch
//! area.
//!
//! ## Termination policy
//!
//! Pages are requested one at a time by increasing 1-based index. The
//! sequence ends at the first index that yields no image:
//!
//! * page 1 yields nothing or fails → fatal, the source is not a usable PDF;
//! * any later page yields nothing or fails → the document is exhausted.
//!
//! A corrupt page 7 is therefore indistinguishable from the end of a 6-page
//! document.
//!
//! ## Scratch area
//!
//! Every rendered page is re-encoded as PNG into a run-private
//! [`TempDir`]. [`Rasterizer::cleanup`] consumes the rasterizer, so it can
//! run at most once; if a run is cancelled before reaching it, dropping the
//! rasterizer still removes the directory.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and rendering is
//! CPU-heavy; both rendering and PNG encoding run on the blocking pool.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::encode;
use futures::future::join_all;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// One rasterised page stored on the scratch area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

/// Backend that turns one page of a PDF into a bitmap.
///
/// `Ok(None)` means the document has no page `page_num`.
pub trait PageRenderer: Send + Sync {
    fn render_page(
        &self,
        pdf_path: &Path,
        page_num: usize,
    ) -> Result<Option<DynamicImage>, ExtractError>;
}

/// pdfium-backed renderer.
///
/// Binds to `PDFIUM_LIB_PATH` (a library file or the directory holding it)
/// when set, otherwise to the system library.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    dpi: u32,
    max_width_px: u32,
    max_height_px: u32,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_width_px: config.max_width_px,
            max_height_px: config.max_height_px,
            password: config.password.clone(),
        }
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_page(
        &self,
        pdf_path: &Path,
        page_num: usize,
    ) -> Result<Option<DynamicImage>, ExtractError> {
        let pdfium = bind_pdfium()?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_file(pdf_path, password)
            .map_err(|e| load_error(pdf_path, password.is_some(), e))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if page_num == 0 || page_num > total_pages {
            debug!("Page {} beyond end of document ({} pages)", page_num, total_pages);
            return Ok(None);
        }

        let page = pages
            .get((page_num - 1) as u16)
            .map_err(|e| ExtractError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_width_px as i32)
            .set_maximum_height(self.max_height_px as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        Ok(Some(bitmap.as_image()))
    }
}

fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(lib)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn load_error(pdf_path: &Path, had_password: bool, e: PdfiumError) -> ExtractError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            ExtractError::WrongPassword {
                path: pdf_path.to_path_buf(),
            }
        } else {
            ExtractError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        }
    } else {
        ExtractError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: err_str,
        }
    }
}

/// What a single render attempt means for the sequence.
#[derive(Debug)]
enum Step {
    Page(DynamicImage),
    End,
}

/// The termination predicate: page 1 must render, later shortfalls end the
/// document.
fn next_step(
    pdf_path: &Path,
    page_num: usize,
    rendered: Result<Option<DynamicImage>, ExtractError>,
) -> Result<Step, ExtractError> {
    match rendered {
        Ok(Some(image)) => Ok(Step::Page(image)),
        Ok(None) if page_num == 1 => Err(ExtractError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        }),
        Ok(None) => Ok(Step::End),
        Err(e) if page_num == 1 => Err(e),
        Err(e) => {
            warn!(
                "Page {} failed to rasterise, treating document as exhausted: {}",
                page_num, e
            );
            Ok(Step::End)
        }
    }
}

/// Lazy, non-restartable sequence of [`PageImage`]s for one document.
pub struct Rasterizer {
    pdf_path: PathBuf,
    renderer: Arc<dyn PageRenderer>,
    scratch: TempDir,
    produced: Vec<PathBuf>,
    next_page: usize,
    finished: bool,
}

impl Rasterizer {
    /// Create the run's scratch area under `scratch_parent` (system temp dir
    /// when `None`). Nothing is rendered until [`Rasterizer::next_page`].
    pub fn new(
        pdf_path: impl Into<PathBuf>,
        renderer: Arc<dyn PageRenderer>,
        scratch_parent: Option<&Path>,
    ) -> Result<Self, ExtractError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("examcrop-pages-");
        let scratch = match scratch_parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ExtractError::storage(parent, e))?;
                builder
                    .tempdir_in(parent)
                    .map_err(|e| ExtractError::storage(parent, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| ExtractError::storage(std::env::temp_dir(), e))?,
        };
        debug!("Scratch area: {}", scratch.path().display());

        Ok(Self {
            pdf_path: pdf_path.into(),
            renderer,
            scratch,
            produced: Vec::new(),
            next_page: 1,
            finished: false,
        })
    }

    /// Directory holding this run's transient page images.
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Render, re-encode and store the next page.
    ///
    /// Returns `Ok(None)` once the document is exhausted, and keeps doing so
    /// on every later call.
    pub async fn next_page(&mut self) -> Result<Option<PageImage>, ExtractError> {
        if self.finished {
            return Ok(None);
        }

        let page_num = self.next_page;
        let renderer = Arc::clone(&self.renderer);
        let pdf_path = self.pdf_path.clone();
        let out_path = self.scratch.path().join(format!("page_{page_num}.png"));

        let task = tokio::task::spawn_blocking(move || -> Result<Option<PageImage>, ExtractError> {
            let rendered = renderer.render_page(&pdf_path, page_num);
            match next_step(&pdf_path, page_num, rendered)? {
                Step::End => Ok(None),
                Step::Page(image) => {
                    let png = encode::encode_png(&image).map_err(|e| {
                        ExtractError::RasterisationFailed {
                            page: page_num,
                            detail: format!("PNG encoding failed: {}", e),
                        }
                    })?;
                    std::fs::write(&out_path, &png)
                        .map_err(|e| ExtractError::storage(&out_path, e))?;
                    Ok(Some(PageImage {
                        page_num,
                        width: image.width(),
                        height: image.height(),
                        path: out_path,
                    }))
                }
            }
        });

        let result = task
            .await
            .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?;

        match result {
            Ok(Some(page)) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    page.page_num, page.width, page.height
                );
                self.produced.push(page.path.clone());
                self.next_page += 1;
                Ok(Some(page))
            }
            Ok(None) => {
                info!("Document exhausted after {} page(s)", page_num - 1);
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Delete every transient file of the run, then the scratch area itself.
    ///
    /// Files are removed concurrently; a file that is already gone counts as
    /// removed.
    pub async fn cleanup(self) {
        let removals = self.produced.iter().map(|path| async move {
            match tokio::fs::remove_file(path).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    false
                }
            }
        });
        let removed = join_all(removals).await.into_iter().filter(|ok| *ok).count();

        let dir = self.scratch.path().to_path_buf();
        if let Err(e) = self.scratch.close() {
            warn!("Failed to remove scratch area {}: {}", dir.display(), e);
        }
        debug!("Cleanup removed {} page image(s)", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct SyntheticRenderer {
        pages: usize,
        fail_at: Option<usize>,
    }

    impl PageRenderer for SyntheticRenderer {
        fn render_page(
            &self,
            _pdf_path: &Path,
            page_num: usize,
        ) -> Result<Option<DynamicImage>, ExtractError> {
            if self.fail_at == Some(page_num) {
                return Err(ExtractError::RasterisationFailed {
                    page: page_num,
                    detail: "synthetic".into(),
                });
            }
            if page_num > self.pages {
                return Ok(None);
            }
            Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                40,
                60,
                Rgb([255, 255, 255]),
            ))))
        }
    }

    fn rasterizer(pages: usize, fail_at: Option<usize>) -> Rasterizer {
        Rasterizer::new(
            "exam.pdf",
            Arc::new(SyntheticRenderer { pages, fail_at }),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn yields_every_page_then_stops_for_good() {
        let mut r = rasterizer(3, None);
        for expected in 1..=3 {
            let page = r.next_page().await.unwrap().expect("page");
            assert_eq!(page.page_num, expected);
            assert_eq!((page.width, page.height), (40, 60));
            assert!(page.path.exists());
        }
        assert!(r.next_page().await.unwrap().is_none());
        assert!(r.next_page().await.unwrap().is_none());
        r.cleanup().await;
    }

    #[tokio::test]
    async fn first_page_failure_is_fatal() {
        let mut r = rasterizer(3, Some(1));
        let err = r.next_page().await.unwrap_err();
        assert!(matches!(err, ExtractError::RasterisationFailed { page: 1, .. }));
        assert!(r.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_document_is_fatal() {
        let mut r = rasterizer(0, None);
        let err = r.next_page().await.unwrap_err();
        assert!(matches!(err, ExtractError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn later_page_failure_ends_the_document() {
        let mut r = rasterizer(5, Some(3));
        assert!(r.next_page().await.unwrap().is_some());
        assert!(r.next_page().await.unwrap().is_some());
        assert!(r.next_page().await.unwrap().is_none());
        assert!(r.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_scratch_area() {
        let mut r = rasterizer(2, None);
        let first = r.next_page().await.unwrap().unwrap();
        let scratch = r.scratch_path().to_path_buf();
        // A file that vanished early must not upset cleanup.
        std::fs::remove_file(&first.path).unwrap();
        r.next_page().await.unwrap();
        r.cleanup().await;
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn dropping_without_cleanup_still_removes_scratch_area() {
        let mut r = rasterizer(1, None);
        r.next_page().await.unwrap();
        let scratch = r.scratch_path().to_path_buf();
        drop(r);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn scratch_parent_is_honoured() {
        let parent = tempfile::tempdir().unwrap();
        let r = Rasterizer::new(
            "exam.pdf",
            Arc::new(SyntheticRenderer { pages: 1, fail_at: None }),
            Some(parent.path()),
        )
        .unwrap();
        assert!(r.scratch_path().starts_with(parent.path()));
        r.cleanup().await;
    }
}
