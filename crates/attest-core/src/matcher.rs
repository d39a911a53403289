//! Embedding-based face matching against an enrolled catalog.
//!
//! The probe and every catalog embedding are L2-normalized, then each
//! identity is scored by the mean Euclidean distance between the probe and
//! its enrolled samples. The identity with the smallest mean wins; the match
//! is accepted only when that mean falls below the distance threshold.

use crate::types::{KnownIdentity, RecognitionResult};

/// Default mean-distance threshold below which a match is accepted.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// L2-normalize a vector. The zero vector is returned unchanged to avoid
/// division by zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Matches probe embeddings against a catalog of known identities.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Find the catalog identity with the smallest mean distance to the probe.
    ///
    /// Returns `None` for an empty catalog. Identities with no enrolled
    /// embeddings can never win (their mean is undefined and treated as
    /// infinite). Ties break by catalog order: the first identity reaching
    /// the best distance is kept.
    pub fn best_match<'a>(
        &self,
        probe: &[f32],
        catalog: &'a [KnownIdentity],
    ) -> Option<(&'a KnownIdentity, f32)> {
        let probe = l2_normalize(probe);

        let mut best: Option<&KnownIdentity> = None;
        let mut best_distance = f32::MAX;

        for identity in catalog {
            if identity.embeddings.is_empty() {
                continue;
            }

            let total: f32 = identity
                .embeddings
                .iter()
                .map(|e| euclidean_distance(&probe, &l2_normalize(e)))
                .sum();
            let mean = total / identity.embeddings.len() as f32;

            if mean < best_distance {
                best_distance = mean;
                best = Some(identity);
            }
        }

        best.map(|identity| (identity, best_distance))
    }

    /// Match the probe and apply the threshold decision rule.
    ///
    /// Best mean distance below the threshold yields a match with
    /// `confidence = 1 − distance`; anything else (including an empty
    /// catalog) yields the unknown result.
    pub fn recognize(&self, probe: &[f32], catalog: &[KnownIdentity]) -> RecognitionResult {
        match self.best_match(probe, catalog) {
            Some((identity, distance)) if distance < self.threshold => {
                tracing::debug!(
                    identity_id = %identity.id,
                    distance,
                    "probe matched catalog identity"
                );
                RecognitionResult {
                    identity_id: identity.id.clone(),
                    display_name: identity.display_name.clone(),
                    confidence: 1.0 - distance,
                    is_unknown: false,
                }
            }
            _ => RecognitionResult::unknown(),
        }
    }
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}
