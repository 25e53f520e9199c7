use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::stage::StageName;

/// Status of an ad generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record may move from `self` to `next`. Staying put is allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Queued)
                | (Queued, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Completed)
                | (Failed, Failed)
        )
    }
}

/// Render quality requested for the video synthesis stage.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QualityTier {
    #[default]
    Fast,
    Balanced,
    High,
}

impl QualityTier {
    /// Rough wall-clock cost of one job at this tier, used for submission estimates.
    pub fn base_seconds(self) -> u64 {
        match self {
            QualityTier::Fast => 120,
            QualityTier::Balanced => 300,
            QualityTier::High => 480,
        }
    }
}

/// Submission parameters, captured once at creation and never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInput {
    pub name: String,
    pub price: String,
    pub destination_url: String,
    pub description: String,
    pub quality: QualityTier,
}

/// One stored output of a completed format pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub format: String,
    pub reference: String,
    pub size_bytes: u64,
}

/// A non-fatal failure recorded against a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobWarning {
    pub stage: StageName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub detail: String,
}

/// Outcome of the best-effort ad network submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdSubmission {
    Created {
        creative_id: String,
        preview_urls: Vec<String>,
    },
    Failed {
        error: String,
    },
}

/// Ledger entry for one submitted job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub current_stage: Option<StageName>,
    pub progress_percent: u8,
    pub message: String,
    pub input: JobInput,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<JobWarning>,
    pub ad_submission: Option<AdSubmission>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            current_stage: None,
            progress_percent: 0,
            message: "Queued for processing".to_string(),
            input,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            ad_submission: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Enter `stage`, raising progress to `progress` (never lowering it).
    pub fn enter_stage(&mut self, stage: StageName, progress: u8, message: impl Into<String>) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Processing;
            self.started_at = Some(Utc::now());
        }
        self.current_stage = Some(stage);
        self.advance(progress);
        self.message = message.into();
    }

    pub fn advance(&mut self, progress: u8) {
        self.progress_percent = self.progress_percent.max(progress.min(100));
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.current_stage = None;
        self.progress_percent = 100;
        self.message = message.into();
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.current_stage = None;
        self.message = format!("Job failed: {error}");
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> JobInput {
        JobInput {
            name: "Trail Runner".to_string(),
            price: "$89".to_string(),
            destination_url: "https://shop.example.com/trail-runner".to_string(),
            description: "High-quality Trail Runner".to_string(),
            quality: QualityTier::Fast,
        }
    }

    #[test]
    fn test_status_transitions_are_monotone() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_enter_stage_never_lowers_progress() {
        let mut record = JobRecord::new(sample_input());
        record.enter_stage(StageName::GenerateVariants, 20, "variants");
        assert_eq!(record.status, JobStatus::Processing);
        assert!(record.started_at.is_some());

        record.enter_stage(StageName::Analyze, 10, "late analyze");
        assert_eq!(record.progress_percent, 20);
    }

    #[test]
    fn test_fail_clears_stage_and_keeps_progress() {
        let mut record = JobRecord::new(sample_input());
        record.enter_stage(StageName::GenerateVideo, 45, "video");
        record.fail("no outputs produced");
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.current_stage, None);
        assert_eq!(record.progress_percent, 45);
        assert_eq!(record.error.as_deref(), Some("no outputs produced"));
    }

    #[test]
    fn test_quality_tier_parses_case_insensitively() {
        assert_eq!("Balanced".parse::<QualityTier>().ok(), Some(QualityTier::Balanced));
        assert!("ultra".parse::<QualityTier>().is_err());
    }
}
