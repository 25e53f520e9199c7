use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};

/// The fixed pipeline stages, in execution order, plus the closing step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageName {
    Analyze,
    GenerateVariants,
    GenerateVideo,
    ApplyOverlay,
    SubmitToAdNetwork,
    Finalize,
}

/// How the executor treats a stage failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Aborts the job.
    Fatal,
    /// Drops one format; sibling formats continue.
    Partial,
    /// Recorded, otherwise ignored.
    Optional,
}

/// A classified stage failure. Adapters produce these instead of propagating errors.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: StageName,
    pub severity: Severity,
    pub format: Option<String>,
    pub detail: String,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.format {
            Some(format) => write!(f, "{} failed for {}: {}", self.stage, format, self.detail),
            None => write!(f, "{} failed: {}", self.stage, self.detail),
        }
    }
}

/// Result of one stage invocation.
#[derive(Debug)]
pub enum StageResult<T> {
    Done(T),
    Failed(StageFailure),
}

/// Camera motion handed to the video synthesizer.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MotionStyle {
    #[default]
    Orbit,
    #[serde(rename = "360_rotation")]
    #[strum(serialize = "360_rotation")]
    Rotation360,
    GentleSway,
    SlowOrbit,
    ZoomFocus,
    GentleRotation,
}

/// Text overlay look, chosen by configuration.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OverlayStyle {
    #[default]
    Modern,
    Minimal,
    Premium,
    Bold,
}

/// Best-effort product classification from the analysis model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisHint {
    pub category: String,
    pub motion: MotionStyle,
    #[serde(default)]
    pub confidence: f32,
}

/// One per-format image produced by the variant generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub format: String,
    pub path: PathBuf,
}

/// Ad network response for a created creative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdCreative {
    pub creative_id: String,
    #[serde(default)]
    pub preview_urls: Vec<String>,
}
