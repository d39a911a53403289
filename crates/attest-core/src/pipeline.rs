//! Secure recognition pipeline: liveness + identity on one face crop.
//!
//! The face region is cropped from the full frame once and shared by both
//! checks. When liveness is required the scorer and the matcher run as two
//! independent blocking tasks joined before returning — the parallelism is
//! an optimization only, and neither arm sees the other's output or shares
//! mutable state with it.

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::liveness::LivenessScorer;
use crate::matcher::FaceMatcher;
use crate::types::{KnownIdentity, RecognitionResult, SecureRecognitionResult};

/// Face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One face reported by the external detection layer.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: FaceRegion,
    /// 5-point landmarks (eyes, nose, mouth corners) in frame coordinates.
    pub landmarks: Vec<(f32, f32)>,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    #[error("embedding extraction failed: {0}")]
    Extraction(String),
}

/// Opaque capability that turns a face crop into a fixed-length embedding.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("recognition task was cancelled or panicked")]
    TaskFailed,
}

/// Crop the face region from a frame, clamped to the image bounds.
pub fn crop_face(image: &RgbImage, region: &FaceRegion) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let x0 = region.x.clamp(0.0, (w - 1) as f32) as u32;
    let y0 = region.y.clamp(0.0, (h - 1) as f32) as u32;
    let cw = (region.width.max(1.0) as u32).min(w - x0).max(1);
    let ch = (region.height.max(1.0) as u32).min(h - y0).max(1);

    image::imageops::crop_imm(image, x0, y0, cw, ch).to_image()
}

/// Runs the liveness scorer and face matcher on a shared face crop.
#[derive(Clone)]
pub struct SecureRecognitionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    matcher: FaceMatcher,
    scorer: LivenessScorer,
}

impl SecureRecognitionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        matcher: FaceMatcher,
        scorer: LivenessScorer,
    ) -> Self {
        Self {
            embedder,
            matcher,
            scorer,
        }
    }

    /// Recognize one detected face against a catalog snapshot.
    ///
    /// With `liveness_required` the scorer and matcher run concurrently on
    /// the crop; otherwise the scorer is skipped entirely and the result is
    /// marked live unconditionally. `matches_expected_subject` is left
    /// `false` — callers resolve it with
    /// [`SecureRecognitionResult::authorize`].
    pub async fn recognize(
        &self,
        image: &RgbImage,
        face: &DetectedFace,
        catalog: Arc<Vec<KnownIdentity>>,
        liveness_required: bool,
    ) -> Result<SecureRecognitionResult, PipelineError> {
        let crop = Arc::new(crop_face(image, &face.region));

        if !liveness_required {
            let recognition = self.spawn_match(Arc::clone(&crop), catalog).await?;
            return Ok(SecureRecognitionResult {
                is_live: true,
                recognition,
                matches_expected_subject: false,
            });
        }

        let scorer = self.scorer.clone();
        let liveness_crop = Arc::clone(&crop);
        let liveness_task = tokio::task::spawn_blocking(move || {
            let gray = image::DynamicImage::ImageRgb8((*liveness_crop).clone()).to_luma8();
            scorer.check(&gray)
        });

        let match_task = self.spawn_match(Arc::clone(&crop), catalog);

        let (verdict, recognition) = tokio::join!(liveness_task, match_task);
        let verdict = verdict.map_err(|_| PipelineError::TaskFailed)?;
        let recognition = recognition?;

        tracing::debug!(
            is_live = verdict.is_live,
            liveness_score = ?verdict.score,
            identity_id = %recognition.identity_id,
            confidence = recognition.confidence,
            "secure recognition complete"
        );

        Ok(SecureRecognitionResult {
            is_live: verdict.is_live,
            recognition,
            matches_expected_subject: false,
        })
    }

    fn spawn_match(
        &self,
        crop: Arc<RgbImage>,
        catalog: Arc<Vec<KnownIdentity>>,
    ) -> impl std::future::Future<Output = Result<RecognitionResult, PipelineError>> {
        let embedder = Arc::clone(&self.embedder);
        let matcher = self.matcher.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let probe = embedder.embed(&crop)?;
            Ok::<_, EmbeddingError>(matcher.recognize(&probe, &catalog))
        });
        async move {
            match handle.await {
                Ok(inner) => inner.map_err(PipelineError::from),
                Err(_) => Err(PipelineError::TaskFailed),
            }
        }
    }
}
