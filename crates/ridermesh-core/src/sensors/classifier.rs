//! Hazard classifier
//!
//! Front door of the sensor subsystem: accepts the raw accelerometer,
//! gyroscope, and GPS streams, conditions them once, fans the fused
//! samples through the per-hazard detectors, attaches the best-known
//! location, and publishes typed [`HazardEvent`]s.
//!
//! Location attachment never blocks: a live fix is preferred, the
//! last-known coordinates are the fallback, and with neither the event
//! still goes out flagged as location-unknown.

use super::detectors::{
    CrashConfig, CrashDetector, Detection, OverspeedConfig, OverspeedDetector, PotholeConfig,
    PotholeDetector, RoughRoadConfig, RoughRoadDetector,
};
use super::fusion::{ConditionerConfig, SignalConditioner};
use super::types::{AccelSample, GpsFix, HazardEvent};
use crate::events::EventBus;
use crate::external::LocationProvider;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;
use tracing::info;

/// Aggregate configuration for the whole classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub conditioner: ConditionerConfig,
    pub pothole: PotholeConfig,
    pub rough_road: RoughRoadConfig,
    pub crash: CrashConfig,
    pub overspeed: OverspeedConfig,
}

/// Multi-sensor hazard classifier for one ride session.
pub struct HazardClassifier {
    conditioner: SignalConditioner,
    pothole: PotholeDetector,
    rough_road: RoughRoadDetector,
    crash: CrashDetector,
    overspeed: OverspeedDetector,
    location: Box<dyn LocationProvider>,
    last_known: Option<(f64, f64)>,
    events: EventBus<HazardEvent>,
}

impl HazardClassifier {
    pub fn new(config: ClassifierConfig, location: Box<dyn LocationProvider>) -> Self {
        Self {
            conditioner: SignalConditioner::new(config.conditioner),
            pothole: PotholeDetector::new(config.pothole),
            rough_road: RoughRoadDetector::new(config.rough_road),
            crash: CrashDetector::new(config.crash),
            overspeed: OverspeedDetector::new(config.overspeed),
            location,
            last_known: None,
            events: EventBus::default(),
        }
    }

    /// Feed one accelerometer sample; runs every accel-driven detector.
    pub fn push_accel(&mut self, sample: &AccelSample) -> Vec<HazardEvent> {
        let fused = self.conditioner.update(sample);
        let mut detections = Vec::new();
        if let Some(d) = self.pothole.update(&fused) {
            detections.push(d);
        }
        if let Some(d) = self.rough_road.update(&fused) {
            detections.push(d);
        }
        if let Some(d) = self.crash.update(&fused) {
            detections.push(d);
        }
        detections
            .into_iter()
            .map(|d| self.publish(d))
            .collect()
    }

    /// Feed the latest gyroscope rotation-rate magnitude, rad/s.
    pub fn push_rotation(&mut self, magnitude: f64) {
        self.conditioner.set_rotation(magnitude);
    }

    /// Feed one GPS fix; runs the speed-driven detector.
    pub fn push_gps(&mut self, fix: &GpsFix) -> Vec<HazardEvent> {
        self.last_known = Some((fix.lat, fix.lng));
        self.conditioner.set_gps(*fix);
        match self.overspeed.on_gps(fix) {
            Some(d) => vec![self.publish(d)],
            None => Vec::new(),
        }
    }

    /// Drain queued hazard events.
    pub fn poll_events(&mut self) -> Vec<HazardEvent> {
        self.events.drain()
    }

    /// Read-only subscription to the hazard stream.
    pub fn subscribe(&mut self) -> Receiver<HazardEvent> {
        self.events.subscribe()
    }

    /// Best-known coordinates: live fix first, last-known second.
    pub fn best_location(&mut self) -> Option<(f64, f64)> {
        if let Some(fix) = self.location.current_location() {
            self.last_known = Some((fix.lat, fix.lng));
        }
        self.last_known
    }

    fn publish(&mut self, detection: Detection) -> HazardEvent {
        let (lat, lng, located) = match self.best_location() {
            Some((lat, lng)) => (lat, lng, true),
            None => (0.0, 0.0, false),
        };
        let Detection {
            kind,
            severity,
            impact_value,
            timestamp_ms,
            mut description,
        } = detection;
        if !located {
            description.push_str(" (location unknown)");
        }
        let event = HazardEvent {
            kind,
            lat,
            lng,
            severity,
            timestamp_ms,
            description,
            impact_value,
        };
        info!(
            kind = kind.label(),
            severity = event.severity,
            "hazard detected"
        );
        self.events.publish(event.clone());
        event
    }
}
