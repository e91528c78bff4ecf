//! Sensor sample and hazard event types

use serde::{Deserialize, Serialize};

/// One accelerometer vector sample, in m/s², device frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp_ms: u64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: u64) -> Self {
        Self { x, y, z, timestamp_ms }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One GPS fix as delivered by the platform location service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
    /// Ground speed, km/h
    pub speed_kmh: f64,
    /// Horizontal accuracy, meters; higher is worse
    pub accuracy_m: f64,
    pub timestamp_ms: u64,
}

/// Hazard categories the classifier can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HazardKind {
    Pothole,
    RoughRoad,
    CrashRisk,
    Overspeed,
}

impl HazardKind {
    pub fn label(&self) -> &'static str {
        match self {
            HazardKind::Pothole => "pothole",
            HazardKind::RoughRoad => "rough road",
            HazardKind::CrashRisk => "crash risk",
            HazardKind::Overspeed => "overspeed",
        }
    }
}

/// Typed output of the sensor fusion classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardEvent {
    pub kind: HazardKind,
    /// Best-known latitude at emission time
    pub lat: f64,
    /// Best-known longitude at emission time
    pub lng: f64,
    /// 0.0–1.0, monotonic with detection confidence/intensity
    pub severity: f64,
    pub timestamp_ms: u64,
    pub description: String,
    /// Raw measured magnitude; unit depends on kind (g, count, km/h)
    pub impact_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_magnitude() {
        let s = AccelSample::new(3.0, 4.0, 0.0, 0);
        assert!((s.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_hazard_kind_serde_names() {
        let json = serde_json::to_string(&HazardKind::CrashRisk).unwrap();
        assert_eq!(json, "\"crashRisk\"");
        let json = serde_json::to_string(&HazardKind::RoughRoad).unwrap();
        assert_eq!(json, "\"roughRoad\"");
    }
}
