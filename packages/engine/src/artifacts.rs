//! Artifact storage for generated images.
//!
//! Layout is deterministic per owner and kind so the submitter can
//! detect prior output without any database lookup:
//! `<root>/<owner_ref>/<kind>/image_<index>.png`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::record::JobKind;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist one artifact. Returns the stored path.
    async fn write(
        &self,
        owner_ref: Uuid,
        kind: JobKind,
        index: usize,
        bytes: &[u8],
    ) -> Result<String, ArtifactError>;

    /// Whether any artifact already exists for this owner/kind.
    async fn exists(&self, owner_ref: Uuid, kind: JobKind) -> bool;

    /// All stored artifact paths for this owner/kind, in index order.
    async fn existing_paths(&self, owner_ref: Uuid, kind: JobKind) -> Vec<String>;
}

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, owner_ref: Uuid, kind: JobKind) -> PathBuf {
        self.root.join(owner_ref.to_string()).join(kind.as_str())
    }

    fn path_for(&self, owner_ref: Uuid, kind: JobKind, index: usize) -> PathBuf {
        self.dir_for(owner_ref, kind)
            .join(format!("image_{:02}.png", index))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(
        &self,
        owner_ref: Uuid,
        kind: JobKind,
        index: usize,
        bytes: &[u8],
    ) -> Result<String, ArtifactError> {
        let dir = self.dir_for(owner_ref, kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path_string(&dir),
                source,
            })?;

        let path = self.path_for(owner_ref, kind, index);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path_string(&path),
                source,
            })?;

        Ok(path_string(&path))
    }

    async fn exists(&self, owner_ref: Uuid, kind: JobKind) -> bool {
        tokio::fs::try_exists(self.path_for(owner_ref, kind, 0))
            .await
            .unwrap_or(false)
    }

    async fn existing_paths(&self, owner_ref: Uuid, kind: JobKind) -> Vec<String> {
        let dir = self.dir_for(owner_ref, kind);
        let mut paths = Vec::new();

        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return paths;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("image_") && name.ends_with(".png") {
                paths.push(path_string(&entry.path()));
            }
        }

        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn write_creates_deterministic_path() {
        let (_guard, store) = store();
        let owner = Uuid::new_v4();

        let path = store
            .write(owner, JobKind::NarrationImage, 0, b"png")
            .await
            .unwrap();

        assert!(path.contains(&owner.to_string()));
        assert!(path.contains("narration_image"));
        assert!(path.ends_with("image_00.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }

    #[tokio::test]
    async fn exists_checks_first_index() {
        let (_guard, store) = store();
        let owner = Uuid::new_v4();

        assert!(!store.exists(owner, JobKind::CharacterImage).await);
        store
            .write(owner, JobKind::CharacterImage, 0, b"png")
            .await
            .unwrap();
        assert!(store.exists(owner, JobKind::CharacterImage).await);

        // A different kind under the same owner is independent.
        assert!(!store.exists(owner, JobKind::NarrationImage).await);
    }

    #[tokio::test]
    async fn existing_paths_are_ordered() {
        let (_guard, store) = store();
        let owner = Uuid::new_v4();

        store
            .write(owner, JobKind::ChapterBatchImage, 1, b"b")
            .await
            .unwrap();
        store
            .write(owner, JobKind::ChapterBatchImage, 0, b"a")
            .await
            .unwrap();

        let paths = store.existing_paths(owner, JobKind::ChapterBatchImage).await;
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("image_00.png"));
        assert!(paths[1].ends_with("image_01.png"));
    }

    #[tokio::test]
    async fn existing_paths_empty_when_missing() {
        let (_guard, store) = store();
        let paths = store
            .existing_paths(Uuid::new_v4(), JobKind::NarrationImage)
            .await;
        assert!(paths.is_empty());
    }
}
