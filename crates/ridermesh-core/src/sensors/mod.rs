//! Continuous multi-sensor hazard classification
//!
//! Accelerometer, gyroscope, and GPS streams are conditioned once per
//! sample into shared derived signals, then fanned through four
//! independently cooled-down detectors (pothole, rough road, crash
//! risk, overspeed). Output is a typed [`HazardEvent`] stream; a crash
//! detection additionally feeds the SOS countdown bridge.

pub mod classifier;
pub mod detectors;
pub mod fusion;
pub mod types;

pub use classifier::{ClassifierConfig, HazardClassifier};
pub use detectors::{
    CrashConfig, CrashDetector, OverspeedConfig, OverspeedDetector, PotholeConfig,
    PotholeDetector, RoughRoadConfig, RoughRoadDetector,
};
pub use fusion::{ConditionerConfig, FusedSample, SignalConditioner, STANDARD_GRAVITY};
pub use types::{AccelSample, GpsFix, HazardEvent, HazardKind};
