use std::path::Path;
use uuid::Uuid;

use crate::models::job::{AdSubmission, Artifact};
use crate::models::stage::{AdCreative, StageResult};
use crate::services::collaborators::{ArtifactStore, CollaboratorError};

/// Persist a finished video and describe it for the ledger.
pub async fn persist_artifact(
    store: &dyn ArtifactStore,
    path: &Path,
    job_id: Uuid,
    format: &str,
) -> Result<Artifact, CollaboratorError> {
    let size_bytes = tokio::fs::metadata(path).await?.len();
    let reference = store.persist(path, job_id, format).await?;
    Ok(Artifact {
        format: format.to_string(),
        reference,
        size_bytes,
    })
}

/// Fold the ad stage outcome into the job manifest entry.
pub fn ad_submission(result: StageResult<AdCreative>) -> AdSubmission {
    match result {
        StageResult::Done(creative) => AdSubmission::Created {
            creative_id: creative.creative_id,
            preview_urls: creative.preview_urls,
        },
        StageResult::Failed(failure) => AdSubmission::Failed {
            error: failure.detail,
        },
    }
}

/// Closing message for a completed job.
pub fn summary(artifacts: &[Artifact], dropped: usize, ad: &AdSubmission) -> String {
    let formats: Vec<&str> = artifacts.iter().map(|a| a.format.as_str()).collect();
    let mut message = format!(
        "Generated {} video(s): {}",
        artifacts.len(),
        formats.join(", ")
    );
    if dropped > 0 {
        message.push_str(&format!("; {dropped} format(s) dropped"));
    }
    if let AdSubmission::Failed { .. } = ad {
        message.push_str("; ad submission failed");
    }
    message
}
