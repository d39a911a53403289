//! attest-engine — the verification runtime.
//!
//! Ties the attest-core primitives to an application action: camera frames
//! flow through a throttled, single-permit pump into the secure recognition
//! pipeline; a per-action state machine sequences the identity check, the
//! geofence step, and the domain effect, and publishes its state for the UI.
//!
//! Camera acquisition, model inference, identity storage, and location
//! services are all injected collaborators — the engine owns only the
//! sequencing, throttling, and cancellation logic.

pub mod action;
pub mod catalog;
pub mod config;
pub mod frames;
pub mod verifier;

pub use action::{ActionRequest, EffectRequest, LocationAnchor, SessionAction};
pub use catalog::{CatalogStore, IdentityPool};
pub use config::Config;
pub use frames::{Frame, FramePump, FrameThrottle, OverlaySnapshot};
pub use verifier::{
    ActionVerifier, EffectSink, LocationProvider, MockLocationEvent, ValidationState,
};
