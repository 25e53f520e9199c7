use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::services::collaborators::{ArtifactStore, CollaboratorError};

const VIDEO_DIR: &str = "videos";

/// Filesystem artifact store rooted at a storage directory.
///
/// References are paths relative to the root, e.g.
/// `videos/<job_id>_<format>_<timestamp>.mp4`.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, CollaboratorError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(VIDEO_DIR)).await?;
        tracing::info!(root = %root.display(), "Artifact store initialized");
        Ok(Self { root })
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || reference.is_empty() {
            return Err(CollaboratorError::NotFound(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(
        &self,
        path: &Path,
        job_id: Uuid,
        format: &str,
    ) -> Result<String, CollaboratorError> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let reference = format!("{VIDEO_DIR}/{job_id}_{format}_{timestamp}.mp4");
        let dest = self.root.join(&reference);

        tokio::fs::copy(path, &dest).await?;
        tracing::debug!(job_id = %job_id, format, reference = %reference, "Artifact persisted");
        Ok(reference)
    }

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, CollaboratorError> {
        let path = self.resolve(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CollaboratorError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, CollaboratorError> {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(self.root.join(VIDEO_DIR)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if modified < cutoff {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "Could not delete artifact")
                    }
                }
            }
        }
        Ok(removed)
    }
}
