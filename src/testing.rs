//! Scripted in-process collaborators for exercising the pipeline without models.
//!
//! A [`Script`] says which formats the variant generator yields and which
//! collaborator calls should fail. Files are really written to the job's
//! working directory so the artifact store and cleanup paths run for real.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{Artifact, JobInput, QualityTier};
use crate::models::stage::{AdCreative, AnalysisHint, MotionStyle, OverlayStyle, Variant};
use crate::services::collaborators::{
    AdNetworkClient, AnalysisService, CollaboratorError, OverlayCompositor, Toolkit,
    ToolkitFactory, VariantGenerator, VideoSynthesizer,
};

pub fn sample_input() -> JobInput {
    JobInput {
        name: "Trail Runner".to_string(),
        price: "$89".to_string(),
        destination_url: "https://shop.example.com/trail-runner".to_string(),
        description: "High-quality Trail Runner".to_string(),
        quality: QualityTier::Fast,
    }
}

/// A small but real JPEG.
pub fn sample_jpeg() -> Vec<u8> {
    let pixels = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8 * 16, y as u8 * 16, 128]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(pixels)
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .expect("encode sample jpeg");
    bytes.into_inner()
}

#[derive(Debug, Clone)]
pub struct Script {
    pub formats: Vec<String>,
    pub fail_analysis: bool,
    pub fail_variants: bool,
    pub fail_video: HashSet<String>,
    pub fail_overlay: HashSet<String>,
    pub fail_ads: bool,
    pub delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            formats: vec![
                "square".to_string(),
                "vertical".to_string(),
                "landscape".to_string(),
            ],
            fail_analysis: false,
            fail_variants: false,
            fail_video: HashSet::new(),
            fail_overlay: HashSet::new(),
            fail_ads: false,
            delay: Duration::ZERO,
        }
    }
}

impl Script {
    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.formats = formats.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn fail_video(mut self, format: &str) -> Self {
        self.fail_video.insert(format.to_string());
        self
    }

    pub fn fail_overlay(mut self, format: &str) -> Self {
        self.fail_overlay.insert(format.to_string());
        self
    }

    pub fn fail_analysis(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    pub fn fail_variants(mut self) -> Self {
        self.fail_variants = true;
        self
    }

    pub fn fail_ads(mut self) -> Self {
        self.fail_ads = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Factory that counts builds and releases so recycling can be observed.
pub struct ScriptedFactory {
    script: Arc<Script>,
    builds: AtomicUsize,
    failing_builds: AtomicUsize,
    releases: Arc<AtomicUsize>,
    motions: Arc<Mutex<Vec<MotionStyle>>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            builds: AtomicUsize::new(0),
            failing_builds: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            motions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make the next `n` builds fail.
    pub fn failing_first(self, n: usize) -> Self {
        self.failing_builds.store(n, Ordering::SeqCst);
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Motion styles handed to the video synthesizer, in call order.
    pub fn motions(&self) -> Vec<MotionStyle> {
        self.motions.lock().clone()
    }
}

#[async_trait]
impl ToolkitFactory for ScriptedFactory {
    async fn build(&self) -> Result<Toolkit, CollaboratorError> {
        let pending_failures = self.failing_builds.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_builds.store(pending_failures - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Failed("model weights unavailable".to_string()));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);

        let model = Arc::new(ScriptedModel {
            script: Arc::clone(&self.script),
            releases: Arc::clone(&self.releases),
            motions: Arc::clone(&self.motions),
            creatives: AtomicUsize::new(0),
        });
        Ok(Toolkit {
            analysis: model.clone(),
            variants: model.clone(),
            video: model.clone(),
            overlay: model.clone(),
            ads: model,
        })
    }
}

struct ScriptedModel {
    script: Arc<Script>,
    releases: Arc<AtomicUsize>,
    motions: Arc<Mutex<Vec<MotionStyle>>>,
    creatives: AtomicUsize,
}

impl ScriptedModel {
    async fn pause(&self) {
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
    }
}

fn format_of(path: &Path, suffix: &str) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_suffix(suffix).unwrap_or(stem).to_string()
}

#[async_trait]
impl AnalysisService for ScriptedModel {
    async fn analyze(&self, image: &[u8]) -> Result<AnalysisHint, CollaboratorError> {
        self.pause().await;
        if self.script.fail_analysis || image.is_empty() {
            return Err(CollaboratorError::Failed("analysis model unavailable".to_string()));
        }
        Ok(AnalysisHint {
            category: "shoes".to_string(),
            motion: MotionStyle::Rotation360,
            confidence: 0.9,
        })
    }
}

#[async_trait]
impl VariantGenerator for ScriptedModel {
    async fn generate_variants(
        &self,
        image_path: &Path,
        out_dir: &Path,
    ) -> Result<Vec<Variant>, CollaboratorError> {
        self.pause().await;
        if self.script.fail_variants {
            return Err(CollaboratorError::Failed("resizer crashed".to_string()));
        }
        let mut variants = Vec::new();
        for format in &self.script.formats {
            let path = out_dir.join(format!("{format}.jpg"));
            tokio::fs::copy(image_path, &path).await?;
            variants.push(Variant {
                format: format.clone(),
                path,
            });
        }
        Ok(variants)
    }
}

#[async_trait]
impl VideoSynthesizer for ScriptedModel {
    async fn synthesize(
        &self,
        image_path: &Path,
        motion: MotionStyle,
        quality: QualityTier,
        seed: u64,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError> {
        self.pause().await;
        let format = format_of(image_path, "");
        self.motions.lock().push(motion);
        if self.script.fail_video.contains(&format) {
            return Err(CollaboratorError::Failed(format!("out of memory rendering {format}")));
        }
        let path = out_dir.join(format!("{format}_raw.mp4"));
        tokio::fs::write(&path, format!("video:{format}:{motion}:{quality}:{seed}")).await?;
        Ok(path)
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OverlayCompositor for ScriptedModel {
    async fn compose(
        &self,
        video_path: &Path,
        name: &str,
        price: &str,
        style: OverlayStyle,
        out_dir: &Path,
    ) -> Result<PathBuf, CollaboratorError> {
        self.pause().await;
        let format = format_of(video_path, "_raw");
        if self.script.fail_overlay.contains(&format) {
            return Err(CollaboratorError::Failed(format!("font missing for {format}")));
        }
        let mut body = tokio::fs::read(video_path).await?;
        body.extend_from_slice(format!("|{style}:{name}:{price}").as_bytes());
        let path = out_dir.join(format!("{format}_final.mp4"));
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

#[async_trait]
impl AdNetworkClient for ScriptedModel {
    async fn create_creative(
        &self,
        artifacts: &[Artifact],
        product: &JobInput,
    ) -> Result<AdCreative, CollaboratorError> {
        if self.script.fail_ads {
            return Err(CollaboratorError::Failed("ad network unavailable".to_string()));
        }
        let n = self.creatives.fetch_add(1, Ordering::SeqCst);
        let creative_id = format!("scripted_creative_{n}");
        Ok(AdCreative {
            preview_urls: artifacts
                .iter()
                .map(|a| format!("https://ads.example.com/{creative_id}/{}?p={}", a.format, product.price))
                .collect(),
            creative_id,
        })
    }
}
