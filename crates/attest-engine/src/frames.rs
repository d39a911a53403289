//! Camera-frame intake: throttling, the single-permit processing gate, and
//! the per-frame overlay feed.
//!
//! Frames arrive as a continuous stream. Only every Nth frame is admitted;
//! the rest are dropped immediately without retaining a reference, which
//! bounds CPU cost. A single-permit mutex serializes entry into the
//! recognition pipeline so overlapping frames never race on the catalog
//! snapshot or the state machine. Overlay data for the UI rides a watch
//! channel — single slot, newest value wins.

use std::sync::Arc;

use attest_core::{DetectedFace, SecureRecognitionPipeline};
use image::RgbImage;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::verifier::ActionVerifier;

/// One frame from the (external) camera/detection layer.
pub struct Frame {
    pub image: RgbImage,
    /// Sensor-to-display rotation in degrees (0/90/180/270).
    pub rotation_degrees: i32,
    pub faces: Vec<DetectedFace>,
}

/// Admits every Nth frame of a stream.
#[derive(Debug)]
pub struct FrameThrottle {
    stride: u64,
    counter: u64,
}

impl FrameThrottle {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1) as u64,
            counter: 0,
        }
    }

    /// True for frames 0, N, 2N, … of the stream.
    pub fn admit(&mut self) -> bool {
        let admitted = self.counter % self.stride == 0;
        self.counter += 1;
        admitted
    }
}

/// Per-frame display data for the UI overlay. Observational only.
#[derive(Debug, Clone, Serialize)]
pub struct OverlaySnapshot {
    pub region: attest_core::FaceRegion,
    pub display_name: String,
    pub confidence: f32,
    pub is_live: bool,
}

/// Pumps admitted frames through the pipeline into the verifier.
pub struct FramePump {
    pipeline: SecureRecognitionPipeline,
    verifier: Arc<ActionVerifier>,
    catalogs: Arc<CatalogStore>,
    gate: Mutex<()>,
    throttle: Mutex<FrameThrottle>,
    overlay_tx: watch::Sender<Option<OverlaySnapshot>>,
    liveness_required: bool,
    max_faces_per_frame: usize,
}

impl FramePump {
    pub fn new(
        pipeline: SecureRecognitionPipeline,
        verifier: Arc<ActionVerifier>,
        catalogs: Arc<CatalogStore>,
        config: &Config,
    ) -> (Self, watch::Receiver<Option<OverlaySnapshot>>) {
        let (overlay_tx, overlay_rx) = watch::channel(None);
        (
            Self {
                pipeline,
                verifier,
                catalogs,
                gate: Mutex::new(()),
                throttle: Mutex::new(FrameThrottle::new(config.frame_stride)),
                overlay_tx,
                liveness_required: config.liveness_required,
                max_faces_per_frame: config.max_faces_per_frame,
            },
            overlay_rx,
        )
    }

    /// Submit one camera frame. Frames outside the stride, frames with no
    /// active action, and frames that fail recognition all resolve without
    /// surfacing an error — the verifier just keeps scanning.
    pub async fn submit(&self, frame: Frame) {
        if !self.throttle.lock().await.admit() {
            return;
        }

        let Some(request) = self.verifier.active_request().await else {
            return;
        };

        // One frame inside the pipeline at a time.
        let _permit = self.gate.lock().await;

        let image = normalize_rotation(frame.image, frame.rotation_degrees);

        let Some(face) = best_face(&frame.faces, self.max_faces_per_frame) else {
            self.overlay_tx.send_replace(None);
            self.verifier.on_frame_result(None).await;
            return;
        };

        let catalog = self.catalogs.snapshot(request.action.identity_pool());

        match self
            .pipeline
            .recognize(&image, face, catalog, self.liveness_required)
            .await
        {
            Ok(result) => {
                let result = result.authorize(&request.expected_subject);
                self.overlay_tx.send_replace(Some(OverlaySnapshot {
                    region: face.region,
                    display_name: result.recognition.display_name.clone(),
                    confidence: result.recognition.confidence,
                    is_live: result.is_live,
                }));
                self.verifier.on_frame_result(Some(result)).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame recognition failed — skipping frame");
                self.overlay_tx.send_replace(None);
                self.verifier.on_frame_result(None).await;
            }
        }
    }
}

/// Highest-confidence face among the first `max_faces` detections.
fn best_face(faces: &[DetectedFace], max_faces: usize) -> Option<&DetectedFace> {
    faces
        .iter()
        .take(max_faces.max(1))
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Rotate the frame upright before cropping. Detection coordinates are
/// already reported in upright space by the detection layer.
fn normalize_rotation(image: RgbImage, rotation_degrees: i32) -> RgbImage {
    match rotation_degrees.rem_euclid(360) {
        90 => image::imageops::rotate90(&image),
        180 => image::imageops::rotate180(&image),
        270 => image::imageops::rotate270(&image),
        _ => image,
    }
}
