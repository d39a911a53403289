use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Engine configuration. Thresholds default to the reference values but are
/// a configuration surface, not hidden constants.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mean-distance threshold below which a face match is accepted.
    pub match_threshold: f32,
    /// Spoof-model score threshold below which a face counts as live.
    pub liveness_threshold: f32,
    /// Laplacian-variance floor below which a crop is rejected as blurred.
    pub blur_threshold: f32,
    /// Whether the liveness check runs at all.
    pub liveness_required: bool,
    /// Organization-level switch for the geofence step.
    pub geofence_enabled: bool,
    /// Allowed radius around the expected location, in meters.
    pub geofence_radius_m: f64,
    /// Process every Nth camera frame; the rest are discarded immediately.
    pub frame_stride: usize,
    /// Upper bound on detected faces considered per frame.
    pub max_faces_per_frame: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            liveness_threshold: 0.2,
            blur_threshold: 100.0,
            liveness_required: true,
            geofence_enabled: true,
            geofence_radius_m: 100.0,
            frame_stride: 5,
            max_faces_per_frame: 1,
        }
    }
}

/// Optional TOML overlay; every field falls back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub match_threshold: Option<f32>,
    pub liveness_threshold: Option<f32>,
    pub blur_threshold: Option<f32>,
    pub liveness_required: Option<bool>,
    pub geofence_enabled: Option<bool>,
    pub geofence_radius_m: Option<f64>,
    pub frame_stride: Option<usize>,
    pub max_faces_per_frame: Option<usize>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration from `ATTEST_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            match_threshold: env_f32("ATTEST_MATCH_THRESHOLD", defaults.match_threshold),
            liveness_threshold: env_f32("ATTEST_LIVENESS_THRESHOLD", defaults.liveness_threshold),
            blur_threshold: env_f32("ATTEST_BLUR_THRESHOLD", defaults.blur_threshold),
            liveness_required: env_bool("ATTEST_LIVENESS_REQUIRED", defaults.liveness_required),
            geofence_enabled: env_bool("ATTEST_GEOFENCE_ENABLED", defaults.geofence_enabled),
            geofence_radius_m: env_f64("ATTEST_GEOFENCE_RADIUS_M", defaults.geofence_radius_m),
            frame_stride: env_usize("ATTEST_FRAME_STRIDE", defaults.frame_stride).max(1),
            max_faces_per_frame: env_usize(
                "ATTEST_MAX_FACES_PER_FRAME",
                defaults.max_faces_per_frame,
            )
            .max(1),
        }
    }

    /// Load configuration from a TOML file, applying it over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_overlay(file))
    }

    /// Resolve an overlay against the defaults.
    pub fn from_overlay(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            match_threshold: file.match_threshold.unwrap_or(defaults.match_threshold),
            liveness_threshold: file
                .liveness_threshold
                .unwrap_or(defaults.liveness_threshold),
            blur_threshold: file.blur_threshold.unwrap_or(defaults.blur_threshold),
            liveness_required: file
                .liveness_required
                .unwrap_or(defaults.liveness_required),
            geofence_enabled: file.geofence_enabled.unwrap_or(defaults.geofence_enabled),
            geofence_radius_m: file
                .geofence_radius_m
                .unwrap_or(defaults.geofence_radius_m),
            frame_stride: file.frame_stride.unwrap_or(defaults.frame_stride).max(1),
            max_faces_per_frame: file
                .max_faces_per_frame
                .unwrap_or(defaults.max_faces_per_frame)
                .max(1),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
