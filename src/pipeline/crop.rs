//! Question image storage: cropping, replacement and group deletion.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<groupId>/q<number>_<uuid>.png     cropped by the pipeline
//! <root>/<groupId>/replaced_<uuid>.png      uploaded replacements
//! ```
//!
//! Public URLs are `<url_prefix>/<groupId>/<filename>`. Filenames are unique
//! within a group even when two crops share a question number.

use crate::config::ExtractionConfig;
use crate::error::{CropFailure, ExtractError};
use crate::output::{CroppedQuestion, DetectedQuestion, GroupId};
use crate::pipeline::encode;
use crate::pipeline::render::PageImage;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Crops produced for one page, in input order, plus the boxes that were
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct CropBatch {
    pub cropped: Vec<CroppedQuestion>,
    pub skipped: Vec<CropFailure>,
}

/// File-system storage for question images, partitioned by group.
#[derive(Debug, Clone)]
pub struct QuestionStorage {
    root: PathBuf,
    url_prefix: String,
}

impl QuestionStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(&config.storage_root, &config.url_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every image of `group`.
    pub fn group_dir(&self, group: &GroupId) -> PathBuf {
        self.root.join(group.as_str())
    }

    fn image_url(&self, group: &GroupId, filename: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, group, filename)
    }

    /// Map a public image URL back to its file, if it points inside this
    /// storage.
    pub fn resolve_url(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        let rel = Path::new(rest);
        let components: Vec<_> = rel.components().collect();
        let all_plain = components.iter().all(|c| matches!(c, Component::Normal(_)));
        if components.len() != 2 || !all_plain {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// Crop every box out of `page` and store it under `group`.
    ///
    /// Boxes are clamped to the page first. A box that cannot be cropped,
    /// encoded or written is skipped and reported in
    /// [`CropBatch::skipped`]; the rest of the batch continues. Only an
    /// unreadable page image or an uncreatable group directory is an error.
    pub async fn crop_questions(
        &self,
        page: &PageImage,
        questions: &[DetectedQuestion],
        group: &GroupId,
    ) -> Result<CropBatch, ExtractError> {
        if questions.is_empty() {
            return Ok(CropBatch::default());
        }

        let page = page.clone();
        let questions = questions.to_vec();
        let group_dir = self.group_dir(group);
        let storage = self.clone();
        let group = group.clone();

        tokio::task::spawn_blocking(move || {
            storage.crop_blocking(&page, &questions, &group, &group_dir)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Crop task panicked: {}", e)))?
    }

    fn crop_blocking(
        &self,
        page: &PageImage,
        questions: &[DetectedQuestion],
        group: &GroupId,
        group_dir: &Path,
    ) -> Result<CropBatch, ExtractError> {
        let image = image::open(&page.path).map_err(|e| ExtractError::RasterisationFailed {
            page: page.page_num,
            detail: format!("page image unreadable: {}", e),
        })?;
        let (width, height) = (image.width(), image.height());

        let mut batch = CropBatch::default();
        let mut dir_ready = false;

        for q in questions {
            let number = q.question_number;

            let Some(bbox) = q.bounding_box else {
                let detail = q.malformed.clone().unwrap_or_default();
                warn!(
                    "Page {}: question {} has a malformed box ({}), skipping",
                    page.page_num, number, detail
                );
                batch.skipped.push(CropFailure::Malformed {
                    question: number,
                    detail,
                });
                continue;
            };

            let Some(rect) = bbox.clamp_to(width, height) else {
                warn!(
                    "Page {}: question {} box {:?} is off the page, skipping",
                    page.page_num, number, bbox
                );
                batch.skipped.push(CropFailure::OutOfBounds {
                    question: number,
                    page_width: width,
                    page_height: height,
                });
                continue;
            };

            let snippet = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
            let png = match encode::encode_png(&snippet) {
                Ok(png) => png,
                Err(e) => {
                    warn!("Page {}: question {} encode failed: {}", page.page_num, number, e);
                    batch.skipped.push(CropFailure::Encode {
                        question: number,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            if !dir_ready {
                std::fs::create_dir_all(group_dir)
                    .map_err(|e| ExtractError::storage(group_dir, e))?;
                dir_ready = true;
            }

            let filename = format!("q{}_{}.png", number, Uuid::new_v4());
            let path = group_dir.join(&filename);
            if let Err(e) = std::fs::write(&path, &png) {
                warn!("Page {}: question {} write failed: {}", page.page_num, number, e);
                batch.skipped.push(CropFailure::Write {
                    question: number,
                    detail: e.to_string(),
                });
                continue;
            }

            debug!(
                "Page {}: question {} → {} ({}x{} px)",
                page.page_num, number, filename, rect.width, rect.height
            );
            batch.cropped.push(CroppedQuestion {
                question_number: number,
                question_image_url: self.image_url(group, &filename),
                correct_option: None,
            });
        }

        Ok(batch)
    }

    /// Remove the whole storage partition of `group`.
    ///
    /// Idempotent: a missing partition is already deleted.
    pub async fn delete_group_images(&self, group: &GroupId) -> Result<(), ExtractError> {
        let dir = self.group_dir(group);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Deleted question images of group {}", group);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Group {} has no stored images", group);
                Ok(())
            }
            Err(e) => Err(ExtractError::storage(dir, e)),
        }
    }

    /// Store `new_image` as a replacement question image and return its URL.
    ///
    /// The buffer may be any format the `image` crate decodes; it is stored
    /// as PNG. The old file is deleted on a best-effort basis: if it is
    /// already gone, or the URL does not point into this storage, the
    /// replacement still succeeds.
    pub async fn replace_question_image(
        &self,
        group: &GroupId,
        old_image_url: Option<&str>,
        new_image: &[u8],
    ) -> Result<String, ExtractError> {
        let bytes = new_image.to_vec();
        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ExtractError> {
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| ExtractError::InvalidImage(e.to_string()))?;
            encode::encode_png(&decoded).map_err(|e| ExtractError::InvalidImage(e.to_string()))
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Encode task panicked: {}", e)))??;

        let dir = self.group_dir(group);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExtractError::storage(&dir, e))?;

        let filename = format!("replaced_{}.png", Uuid::new_v4());
        let path = dir.join(&filename);
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| ExtractError::storage(&path, e))?;
        let url = self.image_url(group, &filename);
        info!("Stored replacement image {}", url);

        if let Some(old) = old_image_url {
            self.remove_old_image(old).await;
        }

        Ok(url)
    }

    async fn remove_old_image(&self, url: &str) {
        let Some(path) = self.resolve_url(url) else {
            warn!("Old image URL '{}' is not in question storage, leaving it", url);
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed old image {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Old image {} already gone", path.display())
            }
            Err(e) => warn!("Failed to remove old image {}: {}", path.display(), e),
        }
    }
}
