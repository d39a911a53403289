//! Scenario replay: drive the engine from a recorded JSON file.
//!
//! A scenario fixes everything the engine normally gets from external
//! collaborators: the catalog pools, the per-frame embedding and spoof-model
//! output, and the device location fix. Each scenario frame becomes one
//! camera frame submitted to the pump; the state after every submission is
//! printed, followed by the fired effects.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use serde::Deserialize;

use attest_core::{
    DetectedFace, DeviceFix, EmbeddingError, EmbeddingProvider, FaceMatcher, FaceRegion,
    GeofenceValidator, KnownIdentity, LeafActivations, LivenessScorer, Location,
    SecureRecognitionPipeline, SpoofModel,
};
use attest_core::liveness::LivenessError;
use attest_engine::{
    ActionRequest, ActionVerifier, CatalogStore, Config, EffectRequest, EffectSink, Frame,
    FramePump, IdentityPool, LocationProvider, SessionAction,
};

#[derive(Deserialize)]
struct Scenario {
    action: SessionAction,
    expected_subject: String,
    expected_location: Location,
    #[serde(default = "default_true")]
    geofence_enabled: bool,
    #[serde(default)]
    instructors: Vec<KnownIdentity>,
    #[serde(default)]
    students: Vec<KnownIdentity>,
    #[serde(default)]
    delegate_students: Vec<KnownIdentity>,
    frames: Vec<ScenarioFrame>,
    /// Device fix returned to the geofence step; absent = no fix.
    fix: Option<DeviceFix>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct ScenarioFrame {
    /// Embedding the stub extractor reports for this frame.
    /// Absent = the detector found no face.
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    spoof_predictions: Vec<f32>,
    #[serde(default)]
    spoof_mask: Vec<f32>,
    /// Render the frame flat so the blur gate rejects it.
    #[serde(default)]
    blurry: bool,
}

/// Serves the embedding recorded for the frame currently being replayed.
#[derive(Default)]
struct ReplayEmbedder {
    current: Mutex<Option<Vec<f32>>>,
}

impl EmbeddingProvider for ReplayEmbedder {
    fn embed(&self, _face: &RgbImage) -> Result<Vec<f32>, EmbeddingError> {
        self.current
            .lock()
            .map_err(|_| EmbeddingError::Extraction("replay state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| EmbeddingError::Extraction("no embedding recorded".to_string()))
    }
}

#[derive(Default)]
struct ReplaySpoofModel {
    current: Mutex<Option<LeafActivations>>,
}

impl SpoofModel for ReplaySpoofModel {
    fn evaluate(&self, _face: &GrayImage) -> Result<LeafActivations, LivenessError> {
        self.current
            .lock()
            .map_err(|_| LivenessError::Inference("replay state poisoned".to_string()))?
            .clone()
            .ok_or(LivenessError::ModelUnavailable)
    }
}

struct FixedLocation(Option<DeviceFix>);

impl LocationProvider for FixedLocation {
    fn current_fix(&self) -> Option<DeviceFix> {
        self.0
    }
}

#[derive(Default)]
struct PrintingSink {
    fired: Mutex<Vec<(EffectRequest, String)>>,
}

impl EffectSink for PrintingSink {
    fn fire(&self, effect: EffectRequest, message: &str) {
        if let Ok(mut fired) = self.fired.lock() {
            fired.push((effect, message.to_string()));
        }
    }
}

fn textured_frame(face: bool, blurry: bool) -> Frame {
    let image = if blurry {
        RgbImage::from_pixel(64, 64, image::Rgb([128, 128, 128]))
    } else {
        RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb(if (x + y) % 2 == 0 {
                [255, 255, 255]
            } else {
                [0, 0, 0]
            })
        })
    };
    let faces = if face {
        vec![DetectedFace {
            region: FaceRegion {
                x: 0.0,
                y: 0.0,
                width: 64.0,
                height: 64.0,
            },
            landmarks: vec![],
            confidence: 0.99,
        }]
    } else {
        Vec::new()
    };
    Frame {
        image,
        rotation_degrees: 0,
        faces,
    }
}

pub async fn run(path: &Path, config: Config) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse scenario {}", path.display()))?;
    tracing::info!(
        frames = scenario.frames.len(),
        action = ?scenario.action,
        "scenario loaded"
    );

    let embedder = Arc::new(ReplayEmbedder::default());
    let spoof_model = Arc::new(ReplaySpoofModel::default());
    let sink = Arc::new(PrintingSink::default());

    let catalogs = Arc::new(CatalogStore::new());
    catalogs.replace(IdentityPool::Instructors, scenario.instructors);
    catalogs.replace(IdentityPool::Students, scenario.students);
    catalogs.replace(IdentityPool::DelegateStudents, scenario.delegate_students);

    let pipeline = SecureRecognitionPipeline::new(
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        FaceMatcher::new(config.match_threshold),
        LivenessScorer::new(
            Some(Arc::clone(&spoof_model) as Arc<dyn SpoofModel>),
            config.liveness_threshold,
            config.blur_threshold,
        ),
    );

    let (verifier, _state_rx) = ActionVerifier::new(
        Arc::new(FixedLocation(scenario.fix)),
        Arc::clone(&sink) as Arc<dyn EffectSink>,
        GeofenceValidator::new(config.geofence_radius_m),
    );
    let verifier = Arc::new(verifier);

    let (pump, _overlay_rx) =
        FramePump::new(pipeline, Arc::clone(&verifier), catalogs, &config);

    verifier
        .begin(ActionRequest {
            action: scenario.action,
            expected_subject: scenario.expected_subject,
            expected_location: scenario.expected_location,
            geofence_enabled: scenario.geofence_enabled,
        })
        .await;

    println!(
        "replaying {} frame(s), action {:?}, stride {}",
        scenario.frames.len(),
        scenario.action,
        config.frame_stride
    );

    for (i, sf) in scenario.frames.iter().enumerate() {
        if let Ok(mut slot) = embedder.current.lock() {
            *slot = sf.embedding.clone();
        }
        if let Ok(mut slot) = spoof_model.current.lock() {
            *slot = Some(LeafActivations {
                predictions: sf.spoof_predictions.clone(),
                mask: sf.spoof_mask.clone(),
            });
        }

        pump.submit(textured_frame(sf.embedding.is_some(), sf.blurry))
            .await;
        println!("frame {i:>3}: {:?}", verifier.state());
    }

    println!();
    println!("final state: {:?}", verifier.state());

    let fired = sink
        .fired
        .lock()
        .map(|f| f.clone())
        .unwrap_or_default();
    if fired.is_empty() {
        println!("effects fired: none");
    } else {
        for (effect, message) in &fired {
            println!(
                "effect: {} — \"{message}\"",
                serde_json::to_string(effect)?
            );
        }
    }

    let mock_events = verifier.mock_location_events();
    if !mock_events.is_empty() {
        println!(
            "suspected spoofing attempts: {} (see warn-level logs)",
            mock_events.len()
        );
    }

    Ok(())
}
