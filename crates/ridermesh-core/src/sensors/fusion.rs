//! Shared signal conditioning
//!
//! All four hazard detectors consume the same two derived signals,
//! computed once per accelerometer sample: a low-pass-filtered gravity
//! estimate (exponential filter, fixed smoothing constant) used to
//! extract the linear-acceleration magnitude in g, and the most recent
//! rotation-rate magnitude and GPS speed/accuracy held as rolling state.
//!
//! The gravity filter follows the exponential-smoothing approach used
//! for IMU gravity tracking: simpler than a Kalman filter and entirely
//! adequate at 10 Hz.

use super::types::{AccelSample, GpsFix};
use serde::{Deserialize, Serialize};

/// Standard gravity, m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Conditioner tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Weight kept from the previous gravity estimate per sample.
    ///
    /// Higher is smoother but slower to track device re-orientation.
    pub gravity_smoothing: f64,
    /// GPS fixes older than this are no longer treated as current speed.
    pub speed_stale_ms: u64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            gravity_smoothing: 0.8,
            speed_stale_ms: 5_000,
        }
    }
}

/// One conditioned sample, the unit every detector consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedSample {
    pub timestamp_ms: u64,
    /// Linear acceleration magnitude after gravity subtraction, in g
    pub linear_g: f64,
    /// Most recent rotation-rate magnitude, rad/s
    pub rotation: f64,
    /// Most recent GPS speed, km/h; `None` when no fresh fix exists
    pub speed_kmh: Option<f64>,
    /// Accuracy of that fix, meters
    pub accuracy_m: Option<f64>,
}

/// Computes the shared derived signals.
#[derive(Debug)]
pub struct SignalConditioner {
    config: ConditionerConfig,
    gravity: Option<[f64; 3]>,
    rotation: f64,
    last_fix: Option<GpsFix>,
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self {
            config,
            gravity: None,
            rotation: 0.0,
            last_fix: None,
        }
    }

    /// Fold in an accelerometer sample and produce the fused view.
    pub fn update(&mut self, sample: &AccelSample) -> FusedSample {
        let raw = [sample.x, sample.y, sample.z];
        let gravity = match self.gravity {
            None => raw,
            Some(prev) => {
                let a = self.config.gravity_smoothing;
                [
                    a * prev[0] + (1.0 - a) * raw[0],
                    a * prev[1] + (1.0 - a) * raw[1],
                    a * prev[2] + (1.0 - a) * raw[2],
                ]
            }
        };
        self.gravity = Some(gravity);

        let linear = [raw[0] - gravity[0], raw[1] - gravity[1], raw[2] - gravity[2]];
        let linear_g = (linear[0] * linear[0] + linear[1] * linear[1] + linear[2] * linear[2])
            .sqrt()
            / STANDARD_GRAVITY;

        let (speed_kmh, accuracy_m) = match &self.last_fix {
            Some(fix)
                if sample.timestamp_ms.saturating_sub(fix.timestamp_ms)
                    <= self.config.speed_stale_ms =>
            {
                (Some(fix.speed_kmh), Some(fix.accuracy_m))
            }
            _ => (None, None),
        };

        FusedSample {
            timestamp_ms: sample.timestamp_ms,
            linear_g,
            rotation: self.rotation,
            speed_kmh,
            accuracy_m,
        }
    }

    /// Latest rotation-rate magnitude from the gyroscope, rad/s.
    pub fn set_rotation(&mut self, magnitude: f64) {
        self.rotation = magnitude;
    }

    /// Latest GPS fix.
    pub fn set_gps(&mut self, fix: GpsFix) {
        self.last_fix = Some(fix);
    }

    pub fn last_fix(&self) -> Option<&GpsFix> {
        self.last_fix.as_ref()
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(ConditionerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(ts: u64) -> AccelSample {
        AccelSample::new(0.0, 0.0, STANDARD_GRAVITY, ts)
    }

    #[test]
    fn test_gravity_seeded_from_first_sample() {
        let mut cond = SignalConditioner::default();
        let fused = cond.update(&resting(0));
        // First sample defines gravity, so no linear acceleration yet
        assert!(fused.linear_g < 1e-9);
    }

    #[test]
    fn test_spike_shows_in_linear_g() {
        let mut cond = SignalConditioner::default();
        for ts in 0..10 {
            cond.update(&resting(ts * 100));
        }
        let spike = AccelSample::new(0.0, 0.0, STANDARD_GRAVITY * 3.0, 1000);
        let fused = cond.update(&spike);
        assert!(fused.linear_g > 1.0, "linear_g = {}", fused.linear_g);
    }

    #[test]
    fn test_speed_goes_stale() {
        let mut cond = SignalConditioner::default();
        cond.set_gps(GpsFix {
            lat: 0.0,
            lng: 0.0,
            speed_kmh: 20.0,
            accuracy_m: 5.0,
            timestamp_ms: 0,
        });

        let fresh = cond.update(&resting(1_000));
        assert_eq!(fresh.speed_kmh, Some(20.0));

        let stale = cond.update(&resting(10_000));
        assert_eq!(stale.speed_kmh, None);
    }

    #[test]
    fn test_rotation_held_as_rolling_state() {
        let mut cond = SignalConditioner::default();
        cond.set_rotation(2.5);
        let fused = cond.update(&resting(0));
        assert_eq!(fused.rotation, 2.5);
    }
}
