//! attest-core — verification primitives for privileged session actions.
//!
//! Three independent signals are combined into a single verdict:
//!
//! - **Identity**: embedding-based face matching against an enrolled catalog
//!   ([`matcher`]).
//! - **Liveness**: anti-spoofing score from a leaf-activation model, with a
//!   Laplacian-variance blur pre-check ([`liveness`]).
//! - **Location**: great-circle geofence containment with mock-location
//!   detection ([`geofence`]).
//!
//! [`pipeline::SecureRecognitionPipeline`] runs the identity and liveness
//! checks on a shared face crop, optionally in parallel. Embedding and
//! anti-spoofing inference are injected capabilities — this crate never
//! loads or runs a model itself.

pub mod geofence;
pub mod liveness;
pub mod matcher;
pub mod pipeline;
pub mod types;

pub use geofence::{DeviceFix, GeofenceOutcome, GeofenceValidator, Location};
pub use liveness::{LeafActivations, LivenessScorer, LivenessVerdict, SpoofModel};
pub use matcher::FaceMatcher;
pub use pipeline::{
    DetectedFace, EmbeddingError, EmbeddingProvider, FaceRegion, PipelineError,
    SecureRecognitionPipeline,
};
pub use types::{KnownIdentity, RecognitionResult, SecureRecognitionResult, UNKNOWN_IDENTITY_ID};
