use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::job::{Artifact, JobInput};
use crate::models::stage::{
    AdCreative, AnalysisHint, MotionStyle, OverlayStyle, Severity, StageFailure, StageName,
    StageResult, Variant,
};
use crate::services::collaborators::{
    AdNetworkClient, AnalysisService, CollaboratorError, OverlayCompositor, Toolkit,
    VariantGenerator, VideoSynthesizer,
};

/// Everything a stage may read about the job it is running for.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub input: JobInput,
    /// Scratch directory owned by the current run; removed when the run ends.
    pub work_dir: PathBuf,
    pub seed: u64,
    pub overlay_style: OverlayStyle,
    pub timeout: Duration,
}

/// Uniform contract for one pipeline stage.
///
/// Adapters implement [`Stage::run`] against their collaborator's native API.
/// Callers only use [`Stage::execute`], which never fails: timeouts, panics and
/// collaborator errors all come back as a classified [`StageFailure`].
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> StageName;

    fn severity(&self) -> Severity;

    /// Output format this input belongs to, for per-format stages.
    fn subject(_input: &Self::Input) -> Option<String> {
        None
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Self::Input,
    ) -> Result<Self::Output, CollaboratorError>;

    async fn execute(&self, ctx: &StageContext, input: Self::Input) -> StageResult<Self::Output> {
        let stage = self.name();
        let format = Self::subject(&input);
        let started = Instant::now();

        let attempt = AssertUnwindSafe(self.run(ctx, input)).catch_unwind();
        let outcome = match tokio::time::timeout(ctx.timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CollaboratorError::Panicked(panic_message(panic))),
            Err(_) => Err(CollaboratorError::Timeout(ctx.timeout)),
        };

        let elapsed = started.elapsed();
        metrics::histogram!("stage_duration_seconds", "stage" => stage.to_string())
            .record(elapsed.as_secs_f64());

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    job_id = %ctx.job_id,
                    stage = %stage,
                    format = format.as_deref().unwrap_or("-"),
                    duration_ms = elapsed.as_millis() as u64,
                    "Stage finished"
                );
                StageResult::Done(output)
            }
            Err(e) => {
                let severity = self.severity();
                tracing::warn!(
                    job_id = %ctx.job_id,
                    stage = %stage,
                    format = format.as_deref().unwrap_or("-"),
                    %severity,
                    error = %e,
                    "Stage failed"
                );
                StageResult::Failed(StageFailure {
                    stage,
                    severity,
                    format,
                    detail: e.to_string(),
                })
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Product analysis. Failure is tolerated; the executor falls back to a default motion.
pub struct AnalyzeStage {
    service: Arc<dyn AnalysisService>,
}

#[async_trait]
impl Stage for AnalyzeStage {
    type Input = Arc<[u8]>;
    type Output = AnalysisHint;

    fn name(&self) -> StageName {
        StageName::Analyze
    }

    fn severity(&self) -> Severity {
        Severity::Optional
    }

    async fn run(
        &self,
        _ctx: &StageContext,
        image: Arc<[u8]>,
    ) -> Result<AnalysisHint, CollaboratorError> {
        self.service.analyze(&image).await
    }
}

/// Per-format image variants. No variants means nothing downstream can run.
pub struct VariantsStage {
    generator: Arc<dyn VariantGenerator>,
}

#[async_trait]
impl Stage for VariantsStage {
    type Input = PathBuf;
    type Output = Vec<Variant>;

    fn name(&self) -> StageName {
        StageName::GenerateVariants
    }

    fn severity(&self) -> Severity {
        Severity::Fatal
    }

    async fn run(
        &self,
        ctx: &StageContext,
        image_path: PathBuf,
    ) -> Result<Vec<Variant>, CollaboratorError> {
        let mut variants = self
            .generator
            .generate_variants(&image_path, &ctx.work_dir)
            .await?;
        let mut seen = HashSet::new();
        variants.retain(|variant| {
            let first = seen.insert(variant.format.clone());
            if !first {
                tracing::warn!(job_id = %ctx.job_id, format = %variant.format, "Dropping repeated variant format");
            }
            first
        });
        if variants.is_empty() {
            return Err(CollaboratorError::Failed("no variants produced".to_string()));
        }
        Ok(variants)
    }
}

pub struct VideoRequest {
    pub variant: Variant,
    pub motion: MotionStyle,
}

/// Video synthesis for one variant.
pub struct VideoStage {
    synthesizer: Arc<dyn VideoSynthesizer>,
}

#[async_trait]
impl Stage for VideoStage {
    type Input = VideoRequest;
    type Output = PathBuf;

    fn name(&self) -> StageName {
        StageName::GenerateVideo
    }

    fn severity(&self) -> Severity {
        Severity::Partial
    }

    fn subject(input: &VideoRequest) -> Option<String> {
        Some(input.variant.format.clone())
    }

    async fn run(
        &self,
        ctx: &StageContext,
        request: VideoRequest,
    ) -> Result<PathBuf, CollaboratorError> {
        self.synthesizer
            .synthesize(
                &request.variant.path,
                request.motion,
                ctx.input.quality,
                ctx.seed,
                &ctx.work_dir,
            )
            .await
    }
}

pub struct OverlayRequest {
    pub format: String,
    pub video_path: PathBuf,
}

/// Name/price overlay for one rendered video.
pub struct OverlayStage {
    compositor: Arc<dyn OverlayCompositor>,
}

#[async_trait]
impl Stage for OverlayStage {
    type Input = OverlayRequest;
    type Output = PathBuf;

    fn name(&self) -> StageName {
        StageName::ApplyOverlay
    }

    fn severity(&self) -> Severity {
        Severity::Partial
    }

    fn subject(input: &OverlayRequest) -> Option<String> {
        Some(input.format.clone())
    }

    async fn run(
        &self,
        ctx: &StageContext,
        request: OverlayRequest,
    ) -> Result<PathBuf, CollaboratorError> {
        self.compositor
            .compose(
                &request.video_path,
                &ctx.input.name,
                &ctx.input.price,
                ctx.overlay_style,
                &ctx.work_dir,
            )
            .await
    }
}

/// Best-effort creative submission to the ad network.
pub struct AdSubmissionStage {
    client: Arc<dyn AdNetworkClient>,
}

#[async_trait]
impl Stage for AdSubmissionStage {
    type Input = Vec<Artifact>;
    type Output = AdCreative;

    fn name(&self) -> StageName {
        StageName::SubmitToAdNetwork
    }

    fn severity(&self) -> Severity {
        Severity::Optional
    }

    async fn run(
        &self,
        ctx: &StageContext,
        artifacts: Vec<Artifact>,
    ) -> Result<AdCreative, CollaboratorError> {
        self.client.create_creative(&artifacts, &ctx.input).await
    }
}

/// The five adapters, wired to one worker's toolkit.
pub struct StageSet {
    pub analyze: AnalyzeStage,
    pub variants: VariantsStage,
    pub video: VideoStage,
    pub overlay: OverlayStage,
    pub ads: AdSubmissionStage,
}

impl StageSet {
    pub fn from_toolkit(toolkit: &Toolkit) -> Self {
        Self {
            analyze: AnalyzeStage {
                service: Arc::clone(&toolkit.analysis),
            },
            variants: VariantsStage {
                generator: Arc::clone(&toolkit.variants),
            },
            video: VideoStage {
                synthesizer: Arc::clone(&toolkit.video),
            },
            overlay: OverlayStage {
                compositor: Arc::clone(&toolkit.overlay),
            },
            ads: AdSubmissionStage {
                client: Arc::clone(&toolkit.ads),
            },
        }
    }
}
