use serde::{Deserialize, Serialize};

/// Sentinel identity id emitted when no catalog entry matches the probe.
pub const UNKNOWN_IDENTITY_ID: &str = "unknown";

/// An enrolled person eligible to be matched for a given action.
///
/// Each identity carries one or more reference embeddings (enrolled samples);
/// matching uses the mean distance across all of them. A catalog of these is
/// an immutable snapshot for the duration of a recognition pass — it is never
/// mutated mid-scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub id: String,
    pub display_name: String,
    pub embeddings: Vec<Vec<f32>>,
}

/// Outcome of matching a probe embedding against a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub identity_id: String,
    pub display_name: String,
    /// `1 − mean distance` for a match, `0.0` for an unknown face.
    pub confidence: f32,
    pub is_unknown: bool,
}

impl RecognitionResult {
    /// The result emitted when the best mean distance exceeds the match
    /// threshold, or the catalog is empty.
    pub fn unknown() -> Self {
        Self {
            identity_id: UNKNOWN_IDENTITY_ID.to_string(),
            display_name: "Unknown".to_string(),
            confidence: 0.0,
            is_unknown: true,
        }
    }
}

/// Combined liveness + identity verdict for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureRecognitionResult {
    pub is_live: bool,
    pub recognition: RecognitionResult,
    /// Whether the matched identity is the subject the current action
    /// expects (e.g. the session's assigned instructor). This is a post-hoc
    /// authorization check, not part of matching — see [`Self::authorize`].
    pub matches_expected_subject: bool,
}

impl SecureRecognitionResult {
    /// Resolve the expected-subject check against the action's subject id.
    pub fn authorize(mut self, expected_subject_id: &str) -> Self {
        self.matches_expected_subject =
            !self.recognition.is_unknown && self.recognition.identity_id == expected_subject_id;
        self
    }

    /// True only when the face is live, matched, and is the expected subject.
    pub fn is_verified(&self) -> bool {
        self.is_live && !self.recognition.is_unknown && self.matches_expected_subject
    }
}
