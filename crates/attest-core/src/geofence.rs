//! Geofence evaluation with mock-location detection.
//!
//! An action may only be performed within an allowed radius of an expected
//! coordinate. The device's reported fix carries a platform flag marking it
//! as coming from a mock provider; a mocked fix is never a genuine success,
//! even when it falls inside the radius.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// A device-reported location fix. `mocked` is the platform's
/// "from a mock provider" signal, distinct from ordinary GPS inaccuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceFix {
    pub location: Location,
    pub mocked: bool,
}

/// Result of evaluating a device fix against an expected location.
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceOutcome {
    Inside,
    Outside { distance_m: f64 },
    Unavailable { reason: String },
    /// The fix came from a mock provider. Takes precedence over `Inside`.
    MockDetected,
}

/// Great-circle distance between two coordinates in meters (haversine).
pub fn great_circle_distance_m(a: Location, b: Location) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Evaluates whether a device fix places the user inside the allowed
/// radius of an expected location.
#[derive(Debug, Clone)]
pub struct GeofenceValidator {
    radius_m: f64,
}

impl GeofenceValidator {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }

    /// Evaluate a fix. A missing fix is `Unavailable`; a mocked fix is
    /// `MockDetected` regardless of distance; otherwise containment is
    /// `distance <= radius`.
    pub fn evaluate(&self, expected: Location, actual: Option<&DeviceFix>) -> GeofenceOutcome {
        let Some(fix) = actual else {
            return GeofenceOutcome::Unavailable {
                reason: "no location fix available".to_string(),
            };
        };

        if fix.mocked {
            tracing::warn!(
                lat = fix.location.lat,
                lon = fix.location.lon,
                "mock location provider detected"
            );
            return GeofenceOutcome::MockDetected;
        }

        let distance_m = great_circle_distance_m(expected, fix.location);
        if distance_m <= self.radius_m {
            GeofenceOutcome::Inside
        } else {
            GeofenceOutcome::Outside { distance_m }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: Location = Location { lat: 52.52, lon: 13.405 };

    /// ~111 m north of ORIGIN (0.001° of latitude ≈ 111.19 m).
    const NEARBY: Location = Location { lat: 52.521, lon: 13.405 };

    fn genuine(location: Location) -> DeviceFix {
        DeviceFix {
            location,
            mocked: false,
        }
    }

    #[test]
    fn distance_of_identical_points_is_zero() {
        assert_eq!(great_circle_distance_m(ORIGIN, ORIGIN), 0.0);
    }

    #[test]
    fn distance_of_known_pair_is_accurate() {
        let d = great_circle_distance_m(ORIGIN, NEARBY);
        assert!((d - 111.19).abs() < 1.0, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = great_circle_distance_m(ORIGIN, NEARBY);
        let b = great_circle_distance_m(NEARBY, ORIGIN);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn inside_when_within_radius() {
        let validator = GeofenceValidator::new(150.0);
        assert_eq!(
            validator.evaluate(ORIGIN, Some(&genuine(NEARBY))),
            GeofenceOutcome::Inside
        );
    }

    #[test]
    fn outside_when_beyond_radius() {
        let validator = GeofenceValidator::new(100.0);
        match validator.evaluate(ORIGIN, Some(&genuine(NEARBY))) {
            GeofenceOutcome::Outside { distance_m } => {
                assert!(distance_m > 100.0);
            }
            other => panic!("expected Outside, got {other:?}"),
        }
    }

    #[test]
    fn boundary_is_inclusive() {
        let d = great_circle_distance_m(ORIGIN, NEARBY);
        let validator = GeofenceValidator::new(d);
        assert_eq!(
            validator.evaluate(ORIGIN, Some(&genuine(NEARBY))),
            GeofenceOutcome::Inside
        );
    }

    #[test]
    fn missing_fix_is_unavailable() {
        let validator = GeofenceValidator::new(100.0);
        assert!(matches!(
            validator.evaluate(ORIGIN, None),
            GeofenceOutcome::Unavailable { .. }
        ));
    }

    #[test]
    fn mock_takes_precedence_over_inside() {
        // The mocked fix sits exactly on the expected coordinate — still
        // reported as MockDetected, never Inside.
        let validator = GeofenceValidator::new(100.0);
        let fix = DeviceFix {
            location: ORIGIN,
            mocked: true,
        };
        assert_eq!(
            validator.evaluate(ORIGIN, Some(&fix)),
            GeofenceOutcome::MockDetected
        );
    }

    #[test]
    fn mock_reported_when_outside_too() {
        let validator = GeofenceValidator::new(10.0);
        let fix = DeviceFix {
            location: NEARBY,
            mocked: true,
        };
        assert_eq!(
            validator.evaluate(ORIGIN, Some(&fix)),
            GeofenceOutcome::MockDetected
        );
    }
}
