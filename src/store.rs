//! Document store boundary.
//!
//! The pipeline produces question images and an ordered list of
//! [`CroppedQuestion`]s; persisting that list as a draft test is the job of a
//! [`QuestionStore`]. Hosts with a database implement the trait themselves;
//! [`ManifestStore`] keeps a JSON manifest next to the images, which is all
//! the CLI needs.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::{CroppedQuestion, ExtractionOutput, GroupId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Identifier assigned to a stored question record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(String);

impl QuestionId {
    pub fn generate() -> Self {
        QuestionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persists the ordered question list of a finished run.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Store `questions` as the draft test `group_id`.
    ///
    /// `total` is the question count the caller expects to be stored. Returns
    /// one id per question, in input order.
    async fn save_questions(
        &self,
        group_id: &GroupId,
        label: &str,
        questions: &[CroppedQuestion],
        total: usize,
    ) -> Result<Vec<QuestionId>, ExtractError>;
}

/// An extraction run whose questions were handed to a [`QuestionStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredExtraction {
    pub output: ExtractionOutput,
    pub question_ids: Vec<QuestionId>,
}

/// One question line of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestQuestion {
    pub id: QuestionId,
    #[serde(flatten)]
    pub question: CroppedQuestion,
}

/// Draft test record written by [`ManifestStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub test_id: GroupId,
    pub name: String,
    pub total_questions: usize,
    pub is_published: bool,
    pub questions: Vec<ManifestQuestion>,
}

/// [`QuestionStore`] writing `<root>/<groupId>/manifest.json`.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store manifests alongside the question images.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(&config.storage_root)
    }

    pub fn manifest_path(&self, group_id: &GroupId) -> PathBuf {
        self.root.join(group_id.as_str()).join("manifest.json")
    }

    /// Read back the manifest of `group_id`.
    pub async fn load(&self, group_id: &GroupId) -> Result<Manifest, ExtractError> {
        let path = self.manifest_path(group_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ExtractError::storage(&path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ExtractError::StoreFailed(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl QuestionStore for ManifestStore {
    async fn save_questions(
        &self,
        group_id: &GroupId,
        label: &str,
        questions: &[CroppedQuestion],
        total: usize,
    ) -> Result<Vec<QuestionId>, ExtractError> {
        if total != questions.len() {
            return Err(ExtractError::StoreFailed(format!(
                "expected {} questions, got {}",
                total,
                questions.len()
            )));
        }

        let manifest = Manifest {
            test_id: group_id.clone(),
            name: label.to_string(),
            total_questions: total,
            is_published: false,
            questions: questions
                .iter()
                .map(|q| ManifestQuestion {
                    id: QuestionId::generate(),
                    question: q.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ExtractError::StoreFailed(e.to_string()))?;

        let path = self.manifest_path(group_id);
        write_atomic(&path, &json).await?;
        info!("Saved {} question(s) to {}", total, path.display());

        Ok(manifest.questions.into_iter().map(|q| q.id).collect())
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial
/// manifest.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExtractError::storage(parent, e))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| ExtractError::storage(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ExtractError::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(n: u32) -> CroppedQuestion {
        CroppedQuestion {
            question_number: n,
            question_image_url: format!("/questions/g/q{n}_x.png"),
            correct_option: None,
        }
    }

    #[tokio::test]
    async fn manifest_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let group = GroupId::generate();
        let questions = vec![question(1), question(2), question(3)];

        let ids = store
            .save_questions(&group, "Mock Test 1", &questions, 3)
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let manifest = store.load(&group).await.unwrap();
        assert_eq!(manifest.test_id, group);
        assert_eq!(manifest.name, "Mock Test 1");
        assert_eq!(manifest.total_questions, 3);
        assert!(!manifest.is_published);
        let numbers: Vec<u32> = manifest
            .questions
            .iter()
            .map(|q| q.question.question_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(manifest.questions[0].id, ids[0]);
        assert!(!store.manifest_path(&group).with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn manifest_uses_upload_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let group = GroupId::generate();
        store
            .save_questions(&group, "T", &[question(1)], 1)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(store.manifest_path(&group)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["testId"], group.as_str());
        assert_eq!(v["totalQuestions"], 1);
        assert_eq!(v["isPublished"], false);
        assert_eq!(v["questions"][0]["questionNumber"], 1);
        assert!(v["questions"][0]["correctOption"].is_null());
        assert!(v["questions"][0]["id"].is_string());
    }

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let group = GroupId::generate();
        let err = store
            .save_questions(&group, "T", &[question(1)], 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::StoreFailed(_)));
        assert!(!store.manifest_path(&group).exists());
    }

    #[tokio::test]
    async fn loading_missing_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let err = store.load(&GroupId::generate()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Storage { .. }));
    }
}
