use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::QualityTier;
use crate::models::stage::{AnalysisHint, MotionStyle, OverlayStyle, Variant};
use crate::services::collaborators::{
    AdNetworkClient, AnalysisService, CollaboratorError, OverlayCompositor, Toolkit,
    ToolkitFactory, VariantGenerator, VideoSynthesizer,
};

/// Client for the model-serving endpoint that hosts the analysis, resizing,
/// video and overlay models. Media travels base64-encoded in JSON bodies.
pub struct InferenceClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

#[derive(Serialize)]
struct VideoRequest<'a> {
    image: &'a str,
    motion: MotionStyle,
    quality: QualityTier,
    seed: u64,
}

#[derive(Serialize)]
struct OverlayRequest<'a> {
    video: &'a str,
    name: &'a str,
    price: &'a str,
    style: OverlayStyle,
}

#[derive(Deserialize)]
struct VariantsResponse {
    variants: Vec<EncodedVariant>,
}

#[derive(Deserialize)]
struct EncodedVariant {
    format: String,
    image: String,
}

#[derive(Deserialize)]
struct VideoResponse {
    video: String,
}

impl InferenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<B, R>(&self, route: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, route);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

async fn read_encoded(path: &Path) -> Result<String, CollaboratorError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(STANDARD.encode(bytes))
}

async fn write_decoded(encoded: &str, path: PathBuf) -> Result<PathBuf, CollaboratorError> {
    let bytes = STANDARD.decode(encoded)?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

fn file_stem(path: &Path) -> &str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("media")
}

/// Variant formats are echoed into file names, so keep them to a safe alphabet.
fn safe_format(format: &str) -> Option<&str> {
    let ok = !format.is_empty()
        && format
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    ok.then_some(format)
}

#[async_trait]
impl AnalysisService for InferenceClient {
    async fn analyze(&self, image: &[u8]) -> Result<AnalysisHint, CollaboratorError> {
        let encoded = STANDARD.encode(image);
        self.call("analyze", &ImageRequest { image: &encoded }).await
    }

    async fn release(&self) {
        if let Err(e) = self
            .http
            .post(format!("{}/release", self.base_url))
            .send()
            .await
        {
            tracing::warn!(error = %e, "Model release request failed");
        }
    }
}

#[async_trait]
impl VariantGenerator for InferenceClient {
    async fn generate_variants(
        &self,
        image_path: &Path,
        out_dir: &Path,
    ) -> Result<Vec<Variant>, CollaboratorError> {
        let encoded = read_encoded(image_path).await?;
        let response: VariantsResponse =
            self.call("variants", &ImageRequest { image: &encoded }).await?;

        let mut variants = Vec::with_capacity(response.variants.len());
        for variant in response.variants {
            let Some(format) = safe_format(&variant.format) else {
                tracing::warn!(format = %variant.format, "Skipping variant with unusable format name");
                continue;
            };
            let path = out_dir.join(format!("{format}.png"));
            let path = write_decoded(&variant.image, path).await?;
            variants.push(Variant {
                format: format.to_string(),
                path,
            });
        }
        Ok(variants)
    }
}

#[async_trait]
impl VideoSynthesizer for InferenceClient {
    async fn synthesize(
        &self,
        image_path: &Path,
        motion: MotionStyle,
        quality: QualityTier,
        seed: u64,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError> {
        let encoded = read_encoded(image_path).await?;
        let request = VideoRequest {
            image: &encoded,
            motion,
            quality,
            seed,
        };
        let response: VideoResponse = self.call("video", &request).await?;
        let path = out_dir.join(format!("{}_raw.mp4", file_stem(image_path)));
        write_decoded(&response.video, path).await
    }
}

#[async_trait]
impl OverlayCompositor for InferenceClient {
    async fn compose(
        &self,
        video_path: &Path,
        name: &str,
        price: &str,
        style: OverlayStyle,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError> {
        let encoded = read_encoded(video_path).await?;
        let request = OverlayRequest {
            video: &encoded,
            name,
            price,
            style,
        };
        let response: VideoResponse = self.call("overlay", &request).await?;
        let path = out_dir.join(format!("{}_{style}.mp4", file_stem(video_path)));
        write_decoded(&response.video, path).await
    }
}

/// Builds a fresh inference client (and its connection pool) per worker lifecycle.
pub struct InferenceToolkitFactory {
    base_url: String,
    timeout: Duration,
    ads: Arc<dyn AdNetworkClient>,
}

impl InferenceToolkitFactory {
    pub fn new(base_url: String, timeout: Duration, ads: Arc<dyn AdNetworkClient>) -> Self {
        Self {
            base_url,
            timeout,
            ads,
        }
    }
}

#[async_trait]
impl ToolkitFactory for InferenceToolkitFactory {
    async fn build(&self) -> Result<Toolkit, CollaboratorError> {
        let client = Arc::new(InferenceClient::new(&self.base_url, self.timeout)?);
        tracing::debug!(base_url = %self.base_url, "Inference toolkit built");
        Ok(Toolkit {
            analysis: client.clone(),
            variants: client.clone(),
            video: client.clone(),
            overlay: client,
            ads: Arc::clone(&self.ads),
        })
    }
}
