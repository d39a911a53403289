//! Anti-spoofing liveness scoring.
//!
//! The spoof model is a decision-tree ensemble whose output is two
//! same-length arrays: per-leaf class predictions and a leaf-activation
//! mask. The liveness score is `Σ |prediction[i]| · mask[i]`; lower means
//! more likely a real presence. A face is considered live when the score
//! falls below the threshold.
//!
//! Before the model runs, a cheap blur pre-check computes the Laplacian
//! variance of the grayscale crop. Low variance means the image is too
//! blurry to trust (typical of screen replays and out-of-focus prints) and
//! the face is rejected without consulting the model.
//!
//! # Threat coverage
//!
//! - **Blocks:** photo/screen replays the model was trained on, plus
//!   heavily blurred captures via the variance gate.
//! - **Does not block:** attacks outside the model's training distribution.
//!
//! Failure mode: if the model is unavailable or returns malformed output,
//! liveness fails closed — the face is reported as not live.

use std::sync::Arc;

use image::GrayImage;
use thiserror::Error;

/// Default score threshold; `score < threshold` means live.
pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.2;

/// Default Laplacian-variance floor below which a crop is rejected as
/// too blurry to evaluate.
pub const DEFAULT_BLUR_THRESHOLD: f32 = 100.0;

/// Per-leaf output of the anti-spoofing model for one face crop.
#[derive(Debug, Clone)]
pub struct LeafActivations {
    pub predictions: Vec<f32>,
    pub mask: Vec<f32>,
}

/// Opaque anti-spoofing model capability.
pub trait SpoofModel: Send + Sync {
    fn evaluate(&self, face: &GrayImage) -> Result<LeafActivations, LivenessError>;
}

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("spoof model unavailable")]
    ModelUnavailable,
    #[error("spoof model inference failed: {0}")]
    Inference(String),
    #[error("leaf array length mismatch: {predictions} predictions vs {mask} mask entries")]
    LeafLengthMismatch { predictions: usize, mask: usize },
}

/// Result of a liveness check on one face crop.
#[derive(Debug, Clone)]
pub struct LivenessVerdict {
    /// Whether the crop passed the check (true = likely live).
    pub is_live: bool,
    /// Model score, when the model ran. `None` when the blur gate rejected
    /// the crop first or the model failed.
    pub score: Option<f32>,
    /// Laplacian variance of the grayscale crop.
    pub laplacian_variance: f32,
}

/// Scores face crops for liveness, failing closed on any model problem.
#[derive(Clone)]
pub struct LivenessScorer {
    model: Option<Arc<dyn SpoofModel>>,
    threshold: f32,
    blur_threshold: f32,
}

impl LivenessScorer {
    pub fn new(model: Option<Arc<dyn SpoofModel>>, threshold: f32, blur_threshold: f32) -> Self {
        Self {
            model,
            threshold,
            blur_threshold,
        }
    }

    /// Compute the raw liveness score for a crop.
    pub fn score(&self, face: &GrayImage) -> Result<f32, LivenessError> {
        let model = self.model.as_ref().ok_or(LivenessError::ModelUnavailable)?;
        let leaves = model.evaluate(face)?;
        if leaves.predictions.len() != leaves.mask.len() {
            return Err(LivenessError::LeafLengthMismatch {
                predictions: leaves.predictions.len(),
                mask: leaves.mask.len(),
            });
        }
        Ok(leaves
            .predictions
            .iter()
            .zip(leaves.mask.iter())
            .map(|(p, m)| p.abs() * m)
            .sum())
    }

    /// Run the blur pre-check and, if it passes, the model. Never errors:
    /// any failure yields `is_live = false`.
    pub fn check(&self, face: &GrayImage) -> LivenessVerdict {
        let variance = laplacian_variance(face);
        if variance < self.blur_threshold {
            tracing::debug!(variance, "liveness: crop rejected by blur gate");
            return LivenessVerdict {
                is_live: false,
                score: None,
                laplacian_variance: variance,
            };
        }

        match self.score(face) {
            Ok(score) => LivenessVerdict {
                is_live: score < self.threshold,
                score: Some(score),
                laplacian_variance: variance,
            },
            Err(e) => {
                // Fail closed: an unavailable or broken model must never
                // report a live face.
                tracing::warn!(error = %e, "liveness check failed — treating as not live");
                LivenessVerdict {
                    is_live: false,
                    score: None,
                    laplacian_variance: variance,
                }
            }
        }
    }
}

/// Variance of the discrete Laplacian over the interior pixels of a
/// grayscale image. Images smaller than 3×3 have no interior and report 0.
pub fn laplacian_variance(image: &GrayImage) -> f32 {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| image.get_pixel(x, y).0[0] as f32;

    let count = ((w - 2) * (h - 2)) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let response =
                px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += response as f64;
            sum_sq += (response * response) as f64;
        }
    }

    let mean = sum / count;
    ((sum_sq / count) - mean * mean) as f32
}
