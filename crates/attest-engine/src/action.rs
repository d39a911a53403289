//! Session actions and the domain effects they trigger.
//!
//! Actions differ only in which identity pool is searched, which contract
//! coordinates anchor the geofence, and which domain effect fires once the
//! person and place are verified.

use attest_core::Location;
use serde::{Deserialize, Serialize};

use crate::catalog::IdentityPool;

/// A privileged application action requiring identity + location proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionAction {
    Create,
    Start,
    End,
    Attend,
    Approve,
    ViewAttendance,
}

/// Which contract coordinates bound an action's geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationAnchor {
    CheckIn,
    CheckOut,
}

/// Domain side effect requested on successful verification, delivered to the
/// (external) domain collaborator together with a spoken/displayed message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EffectRequest {
    CreateSession,
    StartSession,
    EndSession,
    RecordAttendance { student_id: String },
    ApproveSession,
    OpenAttendanceDetail,
}

impl SessionAction {
    /// Identity pool searched for this action's expected subject.
    pub fn identity_pool(self) -> IdentityPool {
        match self {
            Self::Create | Self::Start | Self::End | Self::ViewAttendance => {
                IdentityPool::Instructors
            }
            Self::Attend => IdentityPool::Students,
            Self::Approve => IdentityPool::DelegateStudents,
        }
    }

    /// Ending a session verifies against the contract's check-out
    /// coordinates; every other action uses check-in.
    pub fn location_anchor(self) -> LocationAnchor {
        match self {
            Self::End => LocationAnchor::CheckOut,
            _ => LocationAnchor::CheckIn,
        }
    }

    /// Effect fired on success. `recognized_id` is the verified subject.
    pub fn effect_for(self, recognized_id: &str) -> EffectRequest {
        match self {
            Self::Create => EffectRequest::CreateSession,
            Self::Start => EffectRequest::StartSession,
            Self::End => EffectRequest::EndSession,
            Self::Attend => EffectRequest::RecordAttendance {
                student_id: recognized_id.to_string(),
            },
            Self::Approve => EffectRequest::ApproveSession,
            Self::ViewAttendance => EffectRequest::OpenAttendanceDetail,
        }
    }

    /// Human-readable success message for speech/notification delivery.
    pub fn success_message(self, display_name: &str) -> String {
        match self {
            Self::Create => format!("Identity confirmed, {display_name}. Session created."),
            Self::Start => format!("Welcome, {display_name}. Session started."),
            Self::End => format!("Goodbye, {display_name}. Session ended."),
            Self::Attend => format!("{display_name} marked present."),
            Self::Approve => format!("Session approved by {display_name}."),
            Self::ViewAttendance => format!("Identity confirmed, {display_name}."),
        }
    }

    /// Failure message when the device is outside the allowed radius.
    pub fn outside_message(self, distance_m: f64) -> String {
        format!(
            "You are {distance_m:.0} m away from the allowed area for this action. \
             Move closer and try again."
        )
    }
}

/// Everything the verifier needs to run one action attempt. Built by the
/// caller from the relevant contract and organization settings.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: SessionAction,
    /// Identity id that must match for this action (assigned instructor,
    /// the student being marked, the approving delegate).
    pub expected_subject: String,
    /// Check-in or check-out coordinates per [`SessionAction::location_anchor`].
    pub expected_location: Location,
    /// Organization-level geofencing switch, resolved by the caller.
    pub geofence_enabled: bool,
}
