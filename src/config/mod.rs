use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::stage::OverlayStyle;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Number of concurrent workers. Each holds its own model toolkit.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Jobs a worker serves before its toolkit is released and rebuilt (0 = never).
    #[serde(default = "default_max_jobs_per_worker")]
    pub max_jobs_per_worker: usize,

    /// Maximum number of job records held in memory.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// Root directory for persisted videos
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Parent directory for per-job scratch space
    #[serde(default = "std::env::temp_dir")]
    pub work_dir: PathBuf,

    /// Base URL of the model-serving endpoint
    #[serde(default = "default_inference_url")]
    pub inference_url: String,

    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,

    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    #[serde(default)]
    pub overlay_style: OverlayStyle,

    #[serde(default = "default_video_seed")]
    pub video_seed: u64,

    /// When true, ad creatives are mocked instead of sent to the ad network
    #[serde(default = "default_true")]
    pub ad_sandbox_mode: bool,

    #[serde(default = "default_ad_api_url")]
    pub ad_api_url: String,

    pub ad_access_token: Option<String>,

    pub ad_account_id: Option<String>,

    pub ad_page_id: Option<String>,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_count() -> usize {
    1
}

fn default_max_jobs_per_worker() -> usize {
    1
}

fn default_max_jobs() -> usize {
    10_000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./generated_videos")
}

fn default_inference_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    900
}

fn default_stage_timeout_secs() -> u64 {
    900
}

fn default_video_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

fn default_ad_api_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}
