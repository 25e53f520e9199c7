//! Narrow interfaces to the external systems the pipeline drives.
//!
//! The heavy collaborators (models, decoders) are grouped into a [`Toolkit`]
//! owned by exactly one worker and rebuilt through a [`ToolkitFactory`] when
//! the worker recycles. The artifact store is shared by all workers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Artifact, JobInput, QualityTier};
use crate::models::stage::{AdCreative, AnalysisHint, MotionStyle, OverlayStyle, Variant};

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<AnalysisHint, CollaboratorError>;

    /// Drop any loaded model state.
    async fn release(&self) {}
}

#[async_trait]
pub trait VariantGenerator: Send + Sync {
    /// Produce one image per target format under `out_dir`, in output order.
    async fn generate_variants(
        &self,
        image_path: &Path,
        out_dir: &Path,
    ) -> Result<Vec<Variant>, CollaboratorError>;

    async fn release(&self) {}
}

#[async_trait]
pub trait VideoSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        image_path: &Path,
        motion: MotionStyle,
        quality: QualityTier,
        seed: u64,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError>;

    async fn release(&self) {}
}

#[async_trait]
pub trait OverlayCompositor: Send + Sync {
    async fn compose(
        &self,
        video_path: &Path,
        name: &str,
        price: &str,
        style: OverlayStyle,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError>;

    async fn release(&self) {}
}

#[async_trait]
pub trait AdNetworkClient: Send + Sync {
    async fn create_creative(
        &self,
        artifacts: &[Artifact],
        product: &JobInput,
    ) -> Result<AdCreative, CollaboratorError>;
}

/// Durable home for generated media.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy `path` into the store and return a stable reference to it.
    async fn persist(
        &self,
        path: &Path,
        job_id: Uuid,
        format: &str,
    ) -> Result<String, CollaboratorError>;

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, CollaboratorError>;

    /// Delete stored files older than `age`, returning how many were removed.
    async fn purge_older_than(&self, age: Duration) -> Result<usize, CollaboratorError>;
}

/// The per-worker set of heavy collaborators.
#[derive(Clone)]
pub struct Toolkit {
    pub analysis: Arc<dyn AnalysisService>,
    pub variants: Arc<dyn VariantGenerator>,
    pub video: Arc<dyn VideoSynthesizer>,
    pub overlay: Arc<dyn OverlayCompositor>,
    pub ads: Arc<dyn AdNetworkClient>,
}

impl Toolkit {
    /// Release held model state ahead of the toolkit being dropped.
    pub async fn release(&self) {
        self.analysis.release().await;
        self.variants.release().await;
        self.video.release().await;
        self.overlay.release().await;
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("analysis", &"AnalysisService")
            .field("variants", &"VariantGenerator")
            .field("video", &"VideoSynthesizer")
            .field("overlay", &"OverlayCompositor")
            .field("ads", &"AdNetworkClient")
            .finish()
    }
}

/// Builds a fresh toolkit for a worker, initially and after every recycle.
#[async_trait]
pub trait ToolkitFactory: Send + Sync {
    async fn build(&self) -> Result<Toolkit, CollaboratorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Failed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collaborator panicked: {0}")]
    Panicked(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
