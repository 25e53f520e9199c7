use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{Artifact, JobInput};
use crate::models::stage::AdCreative;
use crate::services::collaborators::{AdNetworkClient, ArtifactStore, CollaboratorError};

fn short_hash(value: &str, modulo: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish() % modulo
}

/// Pretends to create creatives. Used whenever sandbox mode is on.
#[derive(Debug, Default)]
pub struct SandboxAdNetwork;

#[async_trait]
impl AdNetworkClient for SandboxAdNetwork {
    async fn create_creative(
        &self,
        artifacts: &[Artifact],
        product: &JobInput,
    ) -> Result<AdCreative, CollaboratorError> {
        let creative_id = format!("sandbox_creative_{}", short_hash(&product.name, 100_000));
        let preview_urls = artifacts
            .iter()
            .map(|a| format!("https://facebook.com/ads/preview/{creative_id}/{}", a.format))
            .collect();

        tracing::info!(
            creative_id = %creative_id,
            videos = artifacts.len(),
            "Sandbox ad creative created"
        );
        Ok(AdCreative {
            creative_id,
            preview_urls,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GraphAdsConfig {
    pub api_url: String,
    pub access_token: String,
    pub account_id: String,
    pub page_id: Option<String>,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Deserialize)]
struct PreviewList {
    #[serde(default)]
    data: Vec<Preview>,
}

#[derive(Deserialize)]
struct Preview {
    #[serde(default)]
    body: String,
}

/// Graph-style ads API client: uploads each video, then builds one creative
/// around the first upload.
pub struct GraphAdsClient {
    http: Client,
    config: GraphAdsConfig,
    store: Arc<dyn ArtifactStore>,
}

impl GraphAdsClient {
    pub fn new(config: GraphAdsConfig, store: Arc<dyn ArtifactStore>) -> Result<Self, CollaboratorError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config: GraphAdsConfig {
                api_url: config.api_url.trim_end_matches('/').to_string(),
                ..config
            },
            store,
        })
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CollaboratorError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn upload_video(&self, artifact: &Artifact) -> Result<String, CollaboratorError> {
        let bytes = self.store.fetch(&artifact.reference).await?;
        let part = Part::bytes(bytes)
            .file_name(format!("{}.mp4", artifact.format))
            .mime_str("video/mp4")?;
        let form = Form::new()
            .text("name", format!("Product Video - {}", artifact.format))
            .part("file", part);

        let url = format!("{}/{}/advideos", self.config.api_url, self.config.account_id);
        let sent = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await?;
        let response = Self::checked(sent).await?;
        let created: CreatedObject = response.json().await?;
        tracing::debug!(format = %artifact.format, media_id = %created.id, "Video uploaded to ad network");
        Ok(created.id)
    }

    async fn preview_urls(&self, creative_id: &str) -> Vec<String> {
        let fallback = vec![format!("https://facebook.com/ads/preview/{creative_id}")];
        let url = format!("{}/{creative_id}/previews", self.config.api_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(&[("ad_format", "DESKTOP_FEED_STANDARD")])
            .send()
            .await;

        let previews = match response {
            Ok(r) if r.status().is_success() => r.json::<PreviewList>().await.ok(),
            _ => None,
        };
        match previews {
            Some(list) if !list.data.is_empty() => list.data.into_iter().map(|p| p.body).collect(),
            _ => fallback,
        }
    }
}

#[async_trait]
impl AdNetworkClient for GraphAdsClient {
    async fn create_creative(
        &self,
        artifacts: &[Artifact],
        product: &JobInput,
    ) -> Result<AdCreative, CollaboratorError> {
        let mut media_ids = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            media_ids.push(self.upload_video(artifact).await?);
        }
        let primary = media_ids
            .first()
            .ok_or_else(|| CollaboratorError::Failed("no videos to submit".to_string()))?;

        let body = json!({
            "name": format!("Product Video Ad - {}", product.name),
            "object_story_spec": {
                "page_id": self.config.page_id,
                "video_data": {
                    "video_id": primary,
                    "title": product.name,
                    "message": product.description,
                    "call_to_action": {
                        "type": "SHOP_NOW",
                        "value": { "link": product.destination_url, "link_title": "Shop Now" }
                    }
                }
            }
        });

        let url = format!("{}/{}/adcreatives", self.config.api_url, self.config.account_id);
        let sent = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;
        let response = Self::checked(sent).await?;
        let created: CreatedObject = response.json().await?;
        tracing::info!(creative_id = %created.id, videos = media_ids.len(), "Ad creative created");

        let preview_urls = self.preview_urls(&created.id).await;
        Ok(AdCreative {
            creative_id: created.id,
            preview_urls,
        })
    }
}
