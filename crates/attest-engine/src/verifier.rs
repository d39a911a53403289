//! Per-action verification state machine.
//!
//! One attempt begins with [`ActionVerifier::begin`] and consumes secure
//! recognition results frame by frame. An unknown face, a wrong subject, or
//! a failed liveness check keep the machine silently in `Scanning`; a
//! verified subject advances to the geofence step (or straight to success
//! when geofencing is disabled), which resolves to one terminal state per
//! attempt. Failure terminals expose `retry`; `cancel` abandons the action
//! and guarantees no stale effect fires afterwards.
//!
//! A detected mock location deliberately stalls the attempt in
//! `LocationProcessing` without a user-visible failure, so an attacker gets
//! no feedback; the attempt is recorded as a security event instead.
//! Product review pending on whether a dedicated failure state should
//! surface here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use attest_core::{DeviceFix, GeofenceOutcome, GeofenceValidator, SecureRecognitionResult};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::action::{ActionRequest, EffectRequest, SessionAction};

/// Externally observable state of the verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationState {
    /// Initial state: keep feeding camera frames.
    Scanning,
    /// Subject verified; waiting for a device location fix.
    LocationProcessing,
    /// Terminal success for this attempt.
    InsideOk { message: String },
    /// Terminal failure: outside the allowed radius. Retryable.
    OutsideFailed {
        message: String,
        retry: SessionAction,
    },
    /// Terminal failure: no location fix. Retryable.
    LocationError { retry: SessionAction },
}

/// Location collaborator. `current_fix` may block; it runs on the blocking
/// pool.
pub trait LocationProvider: Send + Sync {
    fn current_fix(&self) -> Option<DeviceFix>;
}

/// Domain collaborator receiving the effect and its spoken/displayed message.
pub trait EffectSink: Send + Sync {
    fn fire(&self, effect: EffectRequest, message: &str);
}

/// Record of a suspected location-spoofing attempt. Kept separate from
/// ordinary geofence failures so telemetry can tell tampering from bad luck.
#[derive(Debug, Clone)]
pub struct MockLocationEvent {
    pub at: DateTime<Utc>,
    pub attempt_id: Uuid,
    pub action: SessionAction,
}

struct Pending {
    request: ActionRequest,
    attempt_id: Uuid,
    generation: u64,
}

/// The action verification state machine.
pub struct ActionVerifier {
    locations: Arc<dyn LocationProvider>,
    effects: Arc<dyn EffectSink>,
    geofence: GeofenceValidator,
    state_tx: watch::Sender<ValidationState>,
    pending: Mutex<Option<Pending>>,
    /// Bumped on begin/cancel; in-flight work holding an older value is
    /// stale and must not fire its effect.
    generation: AtomicU64,
    mock_events: std::sync::Mutex<Vec<MockLocationEvent>>,
}

impl ActionVerifier {
    pub fn new(
        locations: Arc<dyn LocationProvider>,
        effects: Arc<dyn EffectSink>,
        geofence: GeofenceValidator,
    ) -> (Self, watch::Receiver<ValidationState>) {
        let (state_tx, state_rx) = watch::channel(ValidationState::Scanning);
        (
            Self {
                locations,
                effects,
                geofence,
                state_tx,
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                mock_events: std::sync::Mutex::new(Vec::new()),
            },
            state_rx,
        )
    }

    /// Current state snapshot.
    pub fn state(&self) -> ValidationState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state changes (for the UI layer).
    pub fn subscribe(&self) -> watch::Receiver<ValidationState> {
        self.state_tx.subscribe()
    }

    /// Begin a new attempt, replacing and invalidating any previous one.
    /// Returns the attempt id used in logs and security events.
    pub async fn begin(&self, request: ActionRequest) -> Uuid {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt_id = Uuid::new_v4();
        tracing::info!(
            %attempt_id,
            action = ?request.action,
            expected_subject = %request.expected_subject,
            geofence_enabled = request.geofence_enabled,
            "verification attempt started"
        );
        *self.pending.lock().await = Some(Pending {
            request,
            attempt_id,
            generation,
        });
        self.state_tx.send_replace(ValidationState::Scanning);
        attempt_id
    }

    /// The active request, if the machine is currently consuming frames.
    /// `None` while resolving the geofence step or in a terminal state.
    pub async fn active_request(&self) -> Option<ActionRequest> {
        if !matches!(self.state(), ValidationState::Scanning) {
            return None;
        }
        self.pending.lock().await.as_ref().map(|p| p.request.clone())
    }

    /// Consume the secure recognition result for one processed frame.
    /// `None` means no face was found in the frame.
    pub async fn on_frame_result(&self, result: Option<SecureRecognitionResult>) {
        let (request, generation, attempt_id) = {
            let pending = self.pending.lock().await;
            let Some(p) = pending.as_ref() else {
                return;
            };
            if !matches!(self.state(), ValidationState::Scanning) {
                return;
            }
            (p.request.clone(), p.generation, p.attempt_id)
        };

        let Some(result) = result else {
            return; // no face — keep scanning
        };

        if let Some(reason) = scan_rejection(&result) {
            // Recoverable locally: no error surfaces, the UI keeps showing
            // scanning feedback.
            tracing::debug!(%attempt_id, reason, "frame rejected — still scanning");
            return;
        }

        if !request.geofence_enabled {
            self.succeed(&request, &result, generation, attempt_id).await;
            return;
        }

        self.state_tx.send_replace(ValidationState::LocationProcessing);
        tracing::info!(%attempt_id, "subject verified — requesting device location");

        let locations = Arc::clone(&self.locations);
        let fix = tokio::task::spawn_blocking(move || locations.current_fix())
            .await
            .unwrap_or(None);

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(%attempt_id, "attempt cancelled during location fetch");
            return;
        }

        match self.geofence.evaluate(request.expected_location, fix.as_ref()) {
            GeofenceOutcome::Inside => {
                self.succeed(&request, &result, generation, attempt_id).await;
            }
            GeofenceOutcome::MockDetected => {
                // Security event: do not advance, do not fire the effect,
                // and do not tell the caller why. The attempt stalls here.
                tracing::warn!(
                    %attempt_id,
                    action = ?request.action,
                    "mock location detected — suspected spoofing attempt"
                );
                if let Ok(mut events) = self.mock_events.lock() {
                    events.push(MockLocationEvent {
                        at: Utc::now(),
                        attempt_id,
                        action: request.action,
                    });
                }
            }
            GeofenceOutcome::Outside { distance_m } => {
                tracing::info!(%attempt_id, distance_m, "device outside allowed radius");
                self.state_tx.send_replace(ValidationState::OutsideFailed {
                    message: request.action.outside_message(distance_m),
                    retry: request.action,
                });
            }
            GeofenceOutcome::Unavailable { reason } => {
                tracing::info!(%attempt_id, reason, "no location fix");
                self.state_tx.send_replace(ValidationState::LocationError {
                    retry: request.action,
                });
            }
        }
    }

    /// Re-enter `Scanning` with the same action, subject, and location.
    /// Only meaningful from a retryable failure terminal.
    pub async fn retry(&self) {
        let pending = self.pending.lock().await;
        if pending.is_none() {
            return;
        }
        match self.state() {
            ValidationState::OutsideFailed { .. } | ValidationState::LocationError { .. } => {
                tracing::info!("retrying verification attempt");
                self.state_tx.send_replace(ValidationState::Scanning);
            }
            _ => {}
        }
    }

    /// Abandon the current action. In-flight recognition or location work
    /// becomes stale and can no longer fire an effect.
    pub async fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        if let Some(p) = pending.take() {
            tracing::info!(attempt_id = %p.attempt_id, action = ?p.request.action, "attempt cancelled");
        }
        self.state_tx.send_replace(ValidationState::Scanning);
    }

    /// Suspected spoofing attempts recorded so far.
    pub fn mock_location_events(&self) -> Vec<MockLocationEvent> {
        self.mock_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    async fn succeed(
        &self,
        request: &ActionRequest,
        result: &SecureRecognitionResult,
        generation: u64,
        attempt_id: Uuid,
    ) {
        let mut pending = self.pending.lock().await;
        match pending.as_ref() {
            Some(p) if p.generation == generation => {}
            _ => {
                tracing::debug!(%attempt_id, "stale success discarded");
                return;
            }
        }

        let effect = request.action.effect_for(&result.recognition.identity_id);
        let message = request
            .action
            .success_message(&result.recognition.display_name);

        tracing::info!(
            %attempt_id,
            action = ?request.action,
            identity_id = %result.recognition.identity_id,
            confidence = result.recognition.confidence,
            "verification succeeded — firing domain effect"
        );

        self.effects.fire(effect, &message);
        *pending = None;
        self.state_tx
            .send_replace(ValidationState::InsideOk { message });
    }
}

/// Why a frame result keeps the machine in `Scanning`, if it does.
fn scan_rejection(result: &SecureRecognitionResult) -> Option<&'static str> {
    if result.recognition.is_unknown {
        Some("unknown face")
    } else if !result.matches_expected_subject {
        Some("subject mismatch")
    } else if !result.is_live {
        Some("liveness failed")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{Location, RecognitionResult};
    use std::sync::mpsc;

    const VENUE: Location = Location { lat: 52.52, lon: 13.405 };
    const FAR_AWAY: Location = Location { lat: 52.53, lon: 13.405 }; // ~1.1 km

    struct FixedLocation(Option<DeviceFix>);

    impl LocationProvider for FixedLocation {
        fn current_fix(&self) -> Option<DeviceFix> {
            self.0
        }
    }

    /// Blocks in `current_fix` until the test releases it.
    struct GatedLocation {
        rx: std::sync::Mutex<mpsc::Receiver<Option<DeviceFix>>>,
    }

    impl LocationProvider for GatedLocation {
        fn current_fix(&self) -> Option<DeviceFix> {
            self.rx
                .lock()
                .expect("gated location poisoned")
                .recv()
                .unwrap_or(None)
        }
    }

    #[derive(Default)]
    struct Recorder {
        fired: std::sync::Mutex<Vec<(EffectRequest, String)>>,
    }

    impl EffectSink for Recorder {
        fn fire(&self, effect: EffectRequest, message: &str) {
            self.fired
                .lock()
                .expect("recorder poisoned")
                .push((effect, message.to_string()));
        }
    }

    fn verified_as(id: &str, expected: &str) -> SecureRecognitionResult {
        SecureRecognitionResult {
            is_live: true,
            recognition: RecognitionResult {
                identity_id: id.to_string(),
                display_name: "Alice".to_string(),
                confidence: 0.95,
                is_unknown: false,
            },
            matches_expected_subject: false,
        }
        .authorize(expected)
    }

    fn request(action: SessionAction, geofence_enabled: bool) -> ActionRequest {
        ActionRequest {
            action,
            expected_subject: "instructor-1".to_string(),
            expected_location: VENUE,
            geofence_enabled,
        }
    }

    fn verifier_with(
        fix: Option<DeviceFix>,
        radius_m: f64,
    ) -> (Arc<ActionVerifier>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let (verifier, _rx) = ActionVerifier::new(
            Arc::new(FixedLocation(fix)),
            Arc::clone(&recorder) as Arc<dyn EffectSink>,
            GeofenceValidator::new(radius_m),
        );
        (Arc::new(verifier), recorder)
    }

    #[tokio::test]
    async fn geofence_disabled_succeeds_and_fires_effect_once() {
        let (verifier, recorder) = verifier_with(None, 100.0);
        verifier.begin(request(SessionAction::Start, false)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;

        assert!(matches!(verifier.state(), ValidationState::InsideOk { .. }));
        {
            let fired = recorder.fired.lock().unwrap();
            assert_eq!(fired.len(), 1);
            assert_eq!(fired[0].0, EffectRequest::StartSession);
        }

        // Further frames arrive after success: the attempt is finished and
        // must not fire again.
        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;
        assert_eq!(recorder.fired.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outside_radius_is_retryable_failure() {
        let fix = DeviceFix {
            location: FAR_AWAY,
            mocked: false,
        };
        let (verifier, recorder) = verifier_with(Some(fix), 100.0);
        verifier.begin(request(SessionAction::End, true)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;

        match verifier.state() {
            ValidationState::OutsideFailed { retry, .. } => {
                assert_eq!(retry, SessionAction::End);
            }
            other => panic!("expected OutsideFailed, got {other:?}"),
        }
        assert!(recorder.fired.lock().unwrap().is_empty());

        // Retry resets to Scanning with the same action still pending.
        verifier.retry().await;
        assert_eq!(verifier.state(), ValidationState::Scanning);
        let active = verifier.active_request().await.expect("request retained");
        assert_eq!(active.action, SessionAction::End);
        assert_eq!(active.expected_subject, "instructor-1");
    }

    #[tokio::test]
    async fn inside_radius_fires_action_effect() {
        let fix = DeviceFix {
            location: VENUE,
            mocked: false,
        };
        let (verifier, recorder) = verifier_with(Some(fix), 100.0);
        verifier.begin(request(SessionAction::End, true)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;

        assert!(matches!(verifier.state(), ValidationState::InsideOk { .. }));
        let fired = recorder.fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, EffectRequest::EndSession);
    }

    #[tokio::test]
    async fn wrong_subject_stays_scanning_silently() {
        let (verifier, recorder) = verifier_with(None, 100.0);
        verifier.begin(request(SessionAction::Start, false)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-2", "instructor-1")))
            .await;

        assert_eq!(verifier.state(), ValidationState::Scanning);
        assert!(recorder.fired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_face_and_failed_liveness_stay_scanning() {
        let (verifier, recorder) = verifier_with(None, 100.0);
        verifier.begin(request(SessionAction::Start, false)).await;

        verifier
            .on_frame_result(Some(SecureRecognitionResult {
                is_live: true,
                recognition: RecognitionResult::unknown(),
                matches_expected_subject: false,
            }))
            .await;
        assert_eq!(verifier.state(), ValidationState::Scanning);

        let mut spoofed = verified_as("instructor-1", "instructor-1");
        spoofed.is_live = false;
        verifier.on_frame_result(Some(spoofed)).await;
        assert_eq!(verifier.state(), ValidationState::Scanning);

        verifier.on_frame_result(None).await;
        assert_eq!(verifier.state(), ValidationState::Scanning);
        assert!(recorder.fired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fix_surfaces_location_error() {
        let (verifier, _recorder) = verifier_with(None, 100.0);
        verifier.begin(request(SessionAction::Attend, true)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;

        match verifier.state() {
            ValidationState::LocationError { retry } => {
                assert_eq!(retry, SessionAction::Attend);
            }
            other => panic!("expected LocationError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_location_stalls_without_effect() {
        // The mocked fix is dead-center inside the radius — it must still
        // never succeed, and the attempt stalls with no failure surfaced.
        let fix = DeviceFix {
            location: VENUE,
            mocked: true,
        };
        let (verifier, recorder) = verifier_with(Some(fix), 100.0);
        let attempt_id = verifier.begin(request(SessionAction::Start, true)).await;

        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;

        assert_eq!(verifier.state(), ValidationState::LocationProcessing);
        assert!(recorder.fired.lock().unwrap().is_empty());

        let events = verifier.mock_location_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attempt_id, attempt_id);
        assert_eq!(events[0].action, SessionAction::Start);
    }

    #[tokio::test]
    async fn attendance_effect_names_the_student() {
        let (verifier, recorder) = verifier_with(None, 100.0);
        verifier
            .begin(ActionRequest {
                action: SessionAction::Attend,
                expected_subject: "student-7".to_string(),
                expected_location: VENUE,
                geofence_enabled: false,
            })
            .await;

        verifier
            .on_frame_result(Some(verified_as("student-7", "student-7")))
            .await;

        let fired = recorder.fired.lock().unwrap();
        assert_eq!(
            fired[0].0,
            EffectRequest::RecordAttendance {
                student_id: "student-7".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_during_location_fetch_suppresses_effect() {
        let (release_tx, release_rx) = mpsc::channel();
        let recorder = Arc::new(Recorder::default());
        let (verifier, _rx) = ActionVerifier::new(
            Arc::new(GatedLocation {
                rx: std::sync::Mutex::new(release_rx),
            }),
            Arc::clone(&recorder) as Arc<dyn EffectSink>,
            GeofenceValidator::new(100.0),
        );
        let verifier = Arc::new(verifier);
        verifier.begin(request(SessionAction::Start, true)).await;

        let worker = {
            let verifier = Arc::clone(&verifier);
            tokio::spawn(async move {
                verifier
                    .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
                    .await;
            })
        };

        // Wait until the machine is inside the location step, then cancel
        // before releasing the (inside-radius) fix.
        let mut state_rx = verifier.subscribe();
        while *state_rx.borrow() != ValidationState::LocationProcessing {
            state_rx.changed().await.expect("verifier dropped");
        }
        verifier.cancel().await;
        release_tx
            .send(Some(DeviceFix {
                location: VENUE,
                mocked: false,
            }))
            .expect("worker gone");

        worker.await.expect("worker panicked");
        assert!(recorder.fired.lock().unwrap().is_empty());
        assert_eq!(verifier.state(), ValidationState::Scanning);
        assert!(verifier.active_request().await.is_none());
    }

    #[tokio::test]
    async fn begin_replaces_previous_attempt() {
        let (verifier, recorder) = verifier_with(None, 100.0);
        verifier.begin(request(SessionAction::Start, false)).await;
        verifier
            .begin(ActionRequest {
                action: SessionAction::Approve,
                expected_subject: "student-9".to_string(),
                expected_location: VENUE,
                geofence_enabled: false,
            })
            .await;

        // The old expected subject no longer verifies anything.
        verifier
            .on_frame_result(Some(verified_as("instructor-1", "instructor-1")))
            .await;
        assert!(recorder.fired.lock().unwrap().is_empty());

        verifier
            .on_frame_result(Some(verified_as("student-9", "student-9")))
            .await;
        let fired = recorder.fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, EffectRequest::ApproveSession);
    }
}
