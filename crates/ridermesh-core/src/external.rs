//! Contracts to collaborators outside the core
//!
//! Location, connectivity, and persistence live in the surrounding app;
//! the core consumes them through these narrow seams. Both traits must be
//! fast and non-blocking — the classifier falls back to its last-known
//! coordinates rather than waiting on a fix, and the relay engine probes
//! connectivity opportunistically mid-relay.

/// A location fix from the platform location service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    /// Ground speed in km/h, when the fix carries one
    pub speed_kmh: Option<f64>,
    /// Horizontal accuracy in meters, when reported
    pub accuracy_m: Option<f64>,
}

/// Platform location service. May fail; callers fall back to last-known
/// coordinates rather than blocking.
pub trait LocationProvider: Send {
    fn current_location(&self) -> Option<LocationFix>;
}

/// Platform connectivity check used for opportunistic delivery.
pub trait ConnectivityProbe: Send {
    /// Fast, non-blocking internet reachability check.
    fn has_internet(&self) -> bool;
}

/// Fixed-answer probe, for wiring and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

impl ConnectivityProbe for FixedProbe {
    fn has_internet(&self) -> bool {
        self.0
    }
}

/// Fixed-position provider, for wiring and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Option<LocationFix>);

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<LocationFix> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe() {
        assert!(FixedProbe(true).has_internet());
        assert!(!FixedProbe(false).has_internet());
    }

    #[test]
    fn test_fixed_location() {
        let fix = LocationFix {
            lat: 12.97,
            lng: 77.59,
            speed_kmh: Some(20.0),
            accuracy_m: Some(5.0),
        };
        assert_eq!(FixedLocation(Some(fix)).current_location(), Some(fix));
        assert!(FixedLocation(None).current_location().is_none());
    }
}
