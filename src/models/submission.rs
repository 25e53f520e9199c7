use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{AdSubmission, Artifact, JobInput, JobRecord, JobWarning, QualityTier};
use crate::models::stage::StageName;

/// Product metadata portion of an upload.
#[derive(Debug, Default, Validate)]
pub struct UploadForm {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(length(min = 1, max = 50))]
    pub price: String,

    #[garde(url)]
    pub url: String,

    #[garde(length(max = 2000))]
    pub description: Option<String>,

    #[garde(skip)]
    pub quality: QualityTier,
}

impl UploadForm {
    pub fn into_input(self) -> JobInput {
        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("High-quality {}", self.name));
        JobInput {
            name: self.name,
            price: self.price,
            destination_url: self.url,
            description,
            quality: self.quality,
        }
    }
}

/// Response after submitting a product image.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: String,
    pub estimated_time_secs: u64,
    pub message: String,
}

/// Status projection of a ledger record.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub current_stage: Option<StageName>,
    pub progress_percent: u8,
    pub message: String,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<JobWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_submission: Option<AdSubmission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.id,
            status: record.status.to_string(),
            current_stage: record.current_stage,
            progress_percent: record.progress_percent,
            message: record.message,
            artifacts: record.artifacts,
            warnings: record.warnings,
            ad_submission: record.ad_submission,
            error: record.error,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

/// Estimated seconds until a newly queued job finishes.
pub fn estimate_seconds(quality: QualityTier, jobs_ahead: usize, workers: usize) -> u64 {
    let rounds = 1 + (jobs_ahead / workers.max(1)) as u64;
    quality.base_seconds() * rounds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> UploadForm {
        UploadForm {
            name: "Trail Runner".to_string(),
            price: "$89".to_string(),
            url: "https://shop.example.com/p/1".to_string(),
            description: None,
            quality: QualityTier::Fast,
        }
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(form().validate().is_ok());
    }

    #[test]
    fn test_empty_name_and_bad_url_rejected() {
        let mut bad = form();
        bad.name = String::new();
        assert!(bad.validate().is_err());

        let mut bad = form();
        bad.url = "not a url".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_missing_description_gets_default() {
        let input = form().into_input();
        assert_eq!(input.description, "High-quality Trail Runner");
        assert_eq!(input.destination_url, "https://shop.example.com/p/1");
    }

    #[test]
    fn test_estimate_scales_with_queue() {
        assert_eq!(estimate_seconds(QualityTier::Fast, 0, 1), 120);
        assert_eq!(estimate_seconds(QualityTier::Fast, 3, 2), 240);
        assert_eq!(estimate_seconds(QualityTier::High, 0, 0), 480);
    }
}
