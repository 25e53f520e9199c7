//! Test helpers: an in-process server on an ephemeral port driven over HTTP

use reqwest::multipart;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use uuid::Uuid;

use video_ad_engine::app_state::AppState;
use video_ad_engine::models::stage::OverlayStyle;
use video_ad_engine::routes;
use video_ad_engine::services::collaborators::ArtifactStore;
use video_ad_engine::services::ledger::JobLedger;
use video_ad_engine::services::pipeline::PipelineSettings;
use video_ad_engine::services::queue::JobQueue;
use video_ad_engine::services::storage::LocalArtifactStore;
use video_ad_engine::services::worker::{PoolConfig, WorkerDeps, WorkerPool};
use video_ad_engine::testing::{Script, ScriptedFactory};

use crate::fixtures::ProductFixture;

/// Response from POST /upload
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: String,
    pub estimated_time_secs: u64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactBody {
    pub format: String,
    pub reference: String,
    pub size_bytes: u64,
}

/// Response from GET /status/{job_id}
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub current_stage: Option<String>,
    pub progress_percent: u8,
    pub message: String,
    pub artifacts: Vec<ArtifactBody>,
    pub warnings: Vec<serde_json::Value>,
    pub ad_submission: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub workers: usize,
    pub max_jobs_per_worker: usize,
    pub capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            max_jobs_per_worker: 1,
            capacity: 100,
        }
    }
}

pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub ledger: Arc<JobLedger>,
    pub factory: Arc<ScriptedFactory>,
    pub pool: WorkerPool,
    dirs: (TempDir, TempDir),
}

impl TestServer {
    pub async fn start(script: Script) -> Self {
        Self::with_options(script, ServerOptions::default()).await
    }

    pub async fn with_options(script: Script, options: ServerOptions) -> Self {
        let work = tempfile::tempdir().expect("work dir");
        let storage = tempfile::tempdir().expect("storage dir");

        let ledger = Arc::new(JobLedger::new(options.capacity));
        let queue = Arc::new(JobQueue::new());
        let store: Arc<dyn ArtifactStore> = Arc::new(
            LocalArtifactStore::new(storage.path())
                .await
                .expect("artifact store"),
        );
        let factory = Arc::new(ScriptedFactory::new(script));

        let pool = WorkerPool::spawn(
            PoolConfig {
                workers: options.workers,
                max_jobs_per_worker: options.max_jobs_per_worker,
                rebuild_backoff: Duration::from_millis(10),
            },
            WorkerDeps {
                queue: Arc::clone(&queue),
                ledger: Arc::clone(&ledger),
                store: Arc::clone(&store),
                factory: factory.clone(),
                settings: Arc::new(PipelineSettings {
                    work_root: work.path().to_path_buf(),
                    seed: 42,
                    overlay_style: OverlayStyle::Modern,
                    stage_timeout: Duration::from_secs(10),
                }),
            },
        );

        let state = AppState::new(Arc::clone(&ledger), queue, store, pool.monitor());
        let app = routes::build_router(state, 10 * 1024 * 1024);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server error");
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            ledger,
            factory,
            pool,
            dirs: (work, storage),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Work directory that holds per-job scratch space.
    pub fn work_dir(&self) -> &std::path::Path {
        self.dirs.0.path()
    }
}

/// Build the multipart form for a product upload.
pub fn product_form(product: &ProductFixture, image: Vec<u8>) -> multipart::Form {
    let mut form = multipart::Form::new()
        .part(
            "image",
            multipart::Part::bytes(image)
                .file_name("product.jpg")
                .mime_str("image/jpeg")
                .expect("mime"),
        )
        .text("name", product.name)
        .text("price", product.price)
        .text("url", product.url);

    if let Some(d) = product.description {
        form = form.text("description", d);
    }
    if let Some(q) = product.quality {
        form = form.text("quality", q);
    }
    form
}

/// POST /upload and return the raw response.
pub async fn upload(
    server: &TestServer,
    form: multipart::Form,
) -> Result<reqwest::Response, reqwest::Error> {
    server.client.post(server.url("/upload")).multipart(form).send().await
}

/// Upload a product, failing on any non-success status.
pub async fn upload_product(
    server: &TestServer,
    product: &ProductFixture,
    image: Vec<u8>,
) -> Result<UploadResponse, Box<dyn std::error::Error>> {
    let response = upload(server, product_form(product, image)).await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<UploadResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    server: &TestServer,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<StatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 20; // Poll every 50ms

    for _ in 0..max_attempts {
        let response = server
            .client
            .get(server.url(&format!("/status/{}", job_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<StatusResponse>().await?;
        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "queued" | "processing" => sleep(Duration::from_millis(50)).await,
            other => return Err(format!("Unknown status: {}", other).into()),
        }
    }

    Err(format!("Timeout waiting for job {} after {}s", job_id, timeout_secs).into())
}

/// Wait for a condition that settles shortly after a job turns terminal.
pub async fn wait_until(mut check: impl FnMut() -> bool, timeout_secs: u64) -> bool {
    for _ in 0..timeout_secs * 20 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}
