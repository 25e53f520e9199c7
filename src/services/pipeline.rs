//! Drives one claimed job through the fixed stage sequence.
//!
//! The executor is the only writer of a job's ledger record while it runs and
//! the only place a [`StageFailure`]'s severity is acted upon:
//!
//! - `Fatal`: the job is marked failed and the run stops.
//! - `Partial`: the format is dropped and recorded as a warning.
//! - `Optional`: recorded as a warning, the run continues unchanged.
//!
//! All scratch files live in a per-run temporary directory that is removed on
//! every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobRecord, JobWarning};
use crate::models::stage::{
    MotionStyle, OverlayStyle, Severity, StageFailure, StageName, StageResult, Variant,
};
use crate::services::collaborators::{ArtifactStore, Toolkit};
use crate::services::ledger::{JobLedger, LedgerError};
use crate::services::manifest;
use crate::services::queue::QueuedJob;
use crate::services::stages::{OverlayRequest, Stage, StageContext, StageSet, VideoRequest};

pub const ANALYZE_PROGRESS: u8 = 10;
pub const VARIANTS_PROGRESS: u8 = 20;
pub const FORMATS_START: u8 = 30;
pub const FORMATS_END: u8 = 80;
pub const AD_PROGRESS: u8 = 90;
pub const DONE_PROGRESS: u8 = 100;

/// Progress checkpoints for one format inside the 30→80 span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatProgress {
    pub video: u8,
    pub overlay: u8,
    pub done: u8,
}

/// Split the format span evenly: video at the slot start, overlay at its
/// midpoint, done at its end.
pub fn format_progress(index: usize, total: usize) -> FormatProgress {
    let total = total.max(1);
    let index = index.min(total - 1);
    let point = |half_steps: usize| -> u8 {
        let span = (FORMATS_END - FORMATS_START) as usize;
        FORMATS_START + (span * half_steps / (2 * total)) as u8
    };
    FormatProgress {
        video: point(2 * index),
        overlay: point(2 * index + 1),
        done: point(2 * index + 2),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent directory for per-job scratch directories.
    pub work_root: PathBuf,
    pub seed: u64,
    pub overlay_style: OverlayStyle,
    pub stage_timeout: Duration,
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { artifacts: usize },
    Failed { error: String },
}

enum Disposition {
    Continue,
    Abort(JobOutcome),
}

enum FormatOutcome {
    Stored,
    Dropped,
    Abort(JobOutcome),
}

pub struct PipelineExecutor {
    ledger: Arc<JobLedger>,
    store: Arc<dyn ArtifactStore>,
    stages: StageSet,
    settings: Arc<PipelineSettings>,
}

impl PipelineExecutor {
    pub fn new(
        ledger: Arc<JobLedger>,
        store: Arc<dyn ArtifactStore>,
        toolkit: &Toolkit,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            ledger,
            store,
            stages: StageSet::from_toolkit(toolkit),
            settings,
        }
    }

    /// Run `job` to a terminal state.
    ///
    /// Errors are only returned when the ledger itself refuses an update; the
    /// job's own failures are reported through [`JobOutcome::Failed`].
    pub async fn run(&self, job: QueuedJob) -> Result<JobOutcome, PipelineError> {
        let id = job.job_id;
        tracing::info!(job_id = %id, quality = %job.input.quality, "Starting ad generation");

        self.ledger.update(id, |r| {
            r.enter_stage(StageName::Analyze, ANALYZE_PROGRESS, "Analyzing product image")
        })?;

        let workspace = match self.workspace(id) {
            Ok(dir) => dir,
            Err(e) => return self.fail(id, format!("could not create working directory: {e}")),
        };

        let outcome = match self.drive(&job, workspace.path()).await {
            Err(PipelineError::Workspace(e)) => {
                self.fail(id, format!("working file error: {e}"))
            }
            other => other,
        };

        if let Err(e) = workspace.close() {
            tracing::warn!(job_id = %id, error = %e, "Failed to remove working directory");
        }
        outcome
    }

    fn workspace(&self, id: Uuid) -> std::io::Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.settings.work_root)?;
        tempfile::Builder::new()
            .prefix(&format!("job-{id}-"))
            .tempdir_in(&self.settings.work_root)
    }

    async fn drive(&self, job: &QueuedJob, work_dir: &Path) -> Result<JobOutcome, PipelineError> {
        let id = job.job_id;
        let ctx = StageContext {
            job_id: id,
            input: job.input.clone(),
            work_dir: work_dir.to_path_buf(),
            seed: self.settings.seed,
            overlay_style: self.settings.overlay_style,
            timeout: self.settings.stage_timeout,
        };

        let source = work_dir.join(format!("source.{}", image_extension(&job.image)));
        tokio::fs::write(&source, &job.image).await?;

        let motion = match self.stages.analyze.execute(&ctx, Arc::clone(&job.image)).await {
            StageResult::Done(hint) => {
                tracing::info!(
                    job_id = %id,
                    category = %hint.category,
                    motion = %hint.motion,
                    "Product analyzed"
                );
                hint.motion
            }
            StageResult::Failed(failure) => {
                if let Disposition::Abort(outcome) = self.interpret(id, failure)? {
                    return Ok(outcome);
                }
                MotionStyle::default()
            }
        };

        self.ledger.update(id, |r| {
            r.enter_stage(
                StageName::GenerateVariants,
                VARIANTS_PROGRESS,
                "Creating image variants for ad formats",
            )
        })?;

        let variants = match self.stages.variants.execute(&ctx, source).await {
            StageResult::Done(variants) => variants,
            StageResult::Failed(failure) => match self.interpret(id, failure)? {
                Disposition::Abort(outcome) => return Ok(outcome),
                Disposition::Continue => Vec::new(),
            },
        };
        tracing::info!(job_id = %id, count = variants.len(), "Variants generated");

        let total = variants.len();
        let mut dropped = 0;
        for (index, variant) in variants.into_iter().enumerate() {
            let progress = format_progress(index, total);
            match self.render_format(&ctx, variant, motion, progress).await? {
                FormatOutcome::Stored => {}
                FormatOutcome::Dropped => {
                    dropped += 1;
                    self.ledger.update(id, |r| r.advance(progress.done))?;
                }
                FormatOutcome::Abort(outcome) => return Ok(outcome),
            }
        }

        let artifacts = self.ledger.get(id)?.artifacts;
        if artifacts.is_empty() {
            return self.fail(id, "no outputs produced".to_string());
        }

        self.ledger.update(id, |r| {
            r.enter_stage(
                StageName::SubmitToAdNetwork,
                AD_PROGRESS,
                "Submitting ad creative",
            )
        })?;
        let result = self.stages.ads.execute(&ctx, artifacts.clone()).await;
        if let StageResult::Failed(failure) = &result {
            if let Disposition::Abort(outcome) = self.interpret(id, failure.clone())? {
                return Ok(outcome);
            }
        }
        let ad = manifest::ad_submission(result);
        let summary = manifest::summary(&artifacts, dropped, &ad);

        self.ledger.update(id, |r| {
            r.enter_stage(StageName::Finalize, DONE_PROGRESS, "Finalizing");
            r.ad_submission = Some(ad);
            r.complete(summary);
        })?;

        metrics::counter!("ad_jobs_completed_total").increment(1);
        tracing::info!(
            job_id = %id,
            artifacts = artifacts.len(),
            dropped,
            "Job completed"
        );
        Ok(JobOutcome::Completed {
            artifacts: artifacts.len(),
        })
    }

    /// Video, overlay and persistence for one variant.
    async fn render_format(
        &self,
        ctx: &StageContext,
        variant: Variant,
        motion: MotionStyle,
        progress: FormatProgress,
    ) -> Result<FormatOutcome, PipelineError> {
        let id = ctx.job_id;
        let format = variant.format.clone();

        self.ledger.update(id, |r| {
            r.enter_stage(
                StageName::GenerateVideo,
                progress.video,
                format!("Generating {format} video"),
            )
        })?;
        let video_path = match self
            .stages
            .video
            .execute(ctx, VideoRequest { variant, motion })
            .await
        {
            StageResult::Done(path) => path,
            StageResult::Failed(failure) => return self.drop_format(id, failure),
        };

        self.ledger.update(id, |r| {
            r.enter_stage(
                StageName::ApplyOverlay,
                progress.overlay,
                format!("Adding text overlay to {format} video"),
            )
        })?;
        let request = OverlayRequest {
            format: format.clone(),
            video_path: video_path.clone(),
        };
        let final_path = match self.stages.overlay.execute(ctx, request).await {
            StageResult::Done(path) => path,
            StageResult::Failed(failure) => return self.drop_format(id, failure),
        };

        let artifact =
            match manifest::persist_artifact(self.store.as_ref(), &final_path, id, &format).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    let failure = StageFailure {
                        stage: StageName::ApplyOverlay,
                        severity: Severity::Partial,
                        format: Some(format.clone()),
                        detail: format!("failed to persist output: {e}"),
                    };
                    return self.drop_format(id, failure);
                }
            };

        self.ledger.update(id, |r| {
            r.artifacts.push(artifact);
            r.advance(progress.done);
            r.message = format!("{format} video ready");
        })?;

        discard_scratch(id, &[video_path, final_path]).await;
        Ok(FormatOutcome::Stored)
    }

    fn drop_format(&self, id: Uuid, failure: StageFailure) -> Result<FormatOutcome, PipelineError> {
        Ok(match self.interpret(id, failure)? {
            Disposition::Abort(outcome) => FormatOutcome::Abort(outcome),
            Disposition::Continue => FormatOutcome::Dropped,
        })
    }

    fn interpret(&self, id: Uuid, failure: StageFailure) -> Result<Disposition, PipelineError> {
        match failure.severity {
            Severity::Fatal => Ok(Disposition::Abort(self.fail(id, failure.to_string())?)),
            Severity::Partial | Severity::Optional => {
                let warning = JobWarning {
                    stage: failure.stage,
                    format: failure.format,
                    detail: failure.detail,
                };
                self.ledger.update(id, |r: &mut JobRecord| r.warnings.push(warning))?;
                Ok(Disposition::Continue)
            }
        }
    }

    fn fail(&self, id: Uuid, error: String) -> Result<JobOutcome, PipelineError> {
        tracing::error!(job_id = %id, error = %error, "Job failed");
        self.ledger.update(id, |r| r.fail(error.clone()))?;
        metrics::counter!("ad_jobs_failed_total").increment(1);
        Ok(JobOutcome::Failed { error })
    }
}

/// Remove intermediate renders once their output is stored.
async fn discard_scratch(id: Uuid, paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::debug!(job_id = %id, path = %path.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
    removed
}

fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("img")
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Working directory error: {0}")]
    Workspace(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{AdSubmission, JobStatus};
    use crate::services::collaborators::ToolkitFactory;
    use crate::services::storage::LocalArtifactStore;
    use crate::testing::{sample_input, sample_jpeg, Script, ScriptedFactory};
    use tempfile::TempDir;

    struct Harness {
        ledger: Arc<JobLedger>,
        executor: PipelineExecutor,
        factory: ScriptedFactory,
        work_root: TempDir,
        _store_root: TempDir,
    }

    async fn harness(script: Script) -> Harness {
        let ledger = Arc::new(JobLedger::new(100));
        let work_root = tempfile::tempdir().unwrap();
        let store_root = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalArtifactStore::new(store_root.path()).await.unwrap());
        let factory = ScriptedFactory::new(script);
        let toolkit = factory.build().await.unwrap();
        let settings = Arc::new(PipelineSettings {
            work_root: work_root.path().to_path_buf(),
            seed: 42,
            overlay_style: OverlayStyle::Modern,
            stage_timeout: Duration::from_secs(5),
        });
        let executor = PipelineExecutor::new(Arc::clone(&ledger), store, &toolkit, settings);
        Harness {
            ledger,
            executor,
            factory,
            work_root,
            _store_root: store_root,
        }
    }

    async fn run_job(h: &Harness) -> (Uuid, JobOutcome) {
        let input = sample_input();
        let job_id = h.ledger.create(input.clone()).unwrap();
        let job = QueuedJob {
            job_id,
            image: Arc::from(sample_jpeg()),
            input,
        };
        let outcome = h.executor.run(job).await.unwrap();
        (job_id, outcome)
    }

    fn work_root_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.work_root.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_format_progress_is_monotone_and_bounded() {
        for total in 1..=7 {
            let mut last = VARIANTS_PROGRESS;
            for index in 0..total {
                let p = format_progress(index, total);
                assert!(p.video >= last && p.overlay >= p.video && p.done >= p.overlay);
                assert!(p.video >= FORMATS_START && p.done <= FORMATS_END);
                last = p.done;
            }
            assert_eq!(last, FORMATS_END);
        }
        assert_eq!(
            format_progress(1, 2),
            FormatProgress {
                video: 55,
                overlay: 67,
                done: 80
            }
        );
    }

    #[tokio::test]
    async fn test_all_formats_succeed() {
        let h = harness(Script::default()).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(outcome, JobOutcome::Completed { artifacts: 3 });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_percent, 100);
        assert_eq!(record.current_stage, None);
        assert!(record.completed_at.is_some());
        let formats: Vec<_> = record.artifacts.iter().map(|a| a.format.as_str()).collect();
        assert_eq!(formats, ["square", "vertical", "landscape"]);
        assert!(record.artifacts.iter().all(|a| a.size_bytes > 0));
        assert!(matches!(record.ad_submission, Some(AdSubmission::Created { .. })));
        assert!(record.warnings.is_empty());
        assert!(work_root_is_empty(&h));
    }

    #[tokio::test]
    async fn test_one_video_failure_drops_only_that_format() {
        let h = harness(Script::default().fail_video("vertical")).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(outcome, JobOutcome::Completed { artifacts: 2 });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.artifacts.len(), 2);
        assert!(record.artifacts.iter().all(|a| a.format != "vertical"));
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.warnings[0].stage, StageName::GenerateVideo);
        assert_eq!(record.warnings[0].format.as_deref(), Some("vertical"));
    }

    #[tokio::test]
    async fn test_one_overlay_failure_drops_only_that_format() {
        let h = harness(Script::default().with_formats(&["square", "vertical"]).fail_overlay("square")).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(outcome, JobOutcome::Completed { artifacts: 1 });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.artifacts[0].format, "vertical");
        assert_eq!(record.warnings[0].stage, StageName::ApplyOverlay);
    }

    #[tokio::test]
    async fn test_all_formats_failing_fails_job() {
        let script = Script::default()
            .fail_video("square")
            .fail_overlay("vertical")
            .fail_video("landscape");
        let h = harness(script).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "no outputs produced".to_string()
            }
        );
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.artifacts.is_empty());
        assert_eq!(record.error.as_deref(), Some("no outputs produced"));
        assert_eq!(record.warnings.len(), 3);
        assert!(work_root_is_empty(&h));
    }

    #[tokio::test]
    async fn test_variant_failure_is_fatal() {
        let h = harness(Script::default().fail_variants()).await;
        let (id, outcome) = run_job(&h).await;

        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress_percent, VARIANTS_PROGRESS);
        assert!(matches!(outcome, JobOutcome::Failed { error } if error.contains("resizer crashed")));
        assert!(record.ad_submission.is_none());
        assert!(work_root_is_empty(&h));
    }

    #[tokio::test]
    async fn test_analysis_failure_falls_back_to_default_motion() {
        let h = harness(Script::default().fail_analysis()).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(outcome, JobOutcome::Completed { artifacts: 3 });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.warnings[0].stage, StageName::Analyze);
        assert!(h.factory.motions().iter().all(|m| *m == MotionStyle::Orbit));
    }

    #[tokio::test]
    async fn test_analysis_hint_reaches_video_stage() {
        let h = harness(Script::default()).await;
        run_job(&h).await;
        assert!(h.factory.motions().iter().all(|m| *m == MotionStyle::Rotation360));
    }

    #[tokio::test]
    async fn test_ad_failure_keeps_job_completed() {
        let h = harness(Script::default().fail_ads()).await;
        let (id, outcome) = run_job(&h).await;

        assert_eq!(outcome, JobOutcome::Completed { artifacts: 3 });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(
            record.ad_submission,
            Some(AdSubmission::Failed {
                error: "ad network unavailable".to_string()
            })
        );
        assert_eq!(record.warnings[0].stage, StageName::SubmitToAdNetwork);
    }

    #[tokio::test]
    async fn test_observed_updates_are_monotone() {
        let h = harness(Script::default().fail_video("square")).await;
        let mut updates = h.ledger.subscribe();
        let (id, _) = run_job(&h).await;

        let mut seen = Vec::new();
        while let Ok(record) = updates.try_recv() {
            if record.id == id {
                seen.push(record);
            }
        }
        assert!(seen.len() > 5);
        assert_eq!(seen[0].status, JobStatus::Queued);
        for pair in seen.windows(2) {
            assert!(pair[1].progress_percent >= pair[0].progress_percent);
            assert!(pair[0].status.can_transition_to(pair[1].status));
        }
        let terminal: Vec<_> = seen.iter().filter(|r| r.status.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_artifacts_visible_mid_job() {
        let h = harness(Script::default()).await;
        let mut updates = h.ledger.subscribe();
        run_job(&h).await;

        let mut saw_partial = false;
        while let Ok(record) = updates.try_recv() {
            if record.status == JobStatus::Processing && record.artifacts.len() == 1 {
                saw_partial = true;
            }
        }
        assert!(saw_partial);
    }

    #[tokio::test]
    async fn test_scratch_removal_continues_past_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = dir.path().join("square_final.mp4");
        std::fs::write(&rendered, b"video").unwrap();
        let missing = dir.path().join("square.mp4");

        let removed = discard_scratch(Uuid::new_v4(), &[missing, rendered.clone()]).await;
        assert_eq!(removed, 1);
        assert!(!rendered.exists());
    }
}
