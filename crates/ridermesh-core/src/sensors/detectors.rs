//! Per-hazard detectors
//!
//! Four independent detectors share the conditioned signal stream. Each
//! carries its own cooldown (`last_triggered` plus a minimum re-trigger
//! interval) so one physical event cannot flood the relay, and every
//! threshold lives in a config struct — the source tuning is ad hoc and
//! callers are expected to calibrate rather than trust the defaults.
//!
//! Timekeeping is sample-timestamp based throughout, which keeps the
//! detectors deterministic under replay.

use super::fusion::FusedSample;
use super::types::{GpsFix, HazardKind};
use serde::{Deserialize, Serialize};

/// A raw detection before location is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: HazardKind,
    pub severity: f64,
    /// Raw measured magnitude; unit depends on kind
    pub impact_value: f64,
    pub timestamp_ms: u64,
    pub description: String,
}

fn severity_scale(value: f64, threshold: f64, span: f64) -> f64 {
    (((value - threshold) / span).clamp(0.0, 1.0)).max(0.05)
}

// ---------------------------------------------------------------------------
// Pothole
// ---------------------------------------------------------------------------

/// Pothole detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotholeConfig {
    /// Linear acceleration that counts as a spike, g
    pub spike_threshold_g: f64,
    /// Spikes longer than this are not potholes
    pub max_spike_duration_ms: u64,
    /// Plausible riding speed range, km/h
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
    /// Rotation above this during the spike means a turn or swerve, not
    /// a pothole
    pub max_rotation_rad_s: f64,
    /// Peak g mapped to severity 1.0 is threshold + this span
    pub severity_span_g: f64,
    pub cooldown_ms: u64,
}

impl Default for PotholeConfig {
    fn default() -> Self {
        Self {
            spike_threshold_g: 1.2,
            max_spike_duration_ms: 150,
            min_speed_kmh: 5.0,
            max_speed_kmh: 80.0,
            max_rotation_rad_s: 2.0,
            severity_span_g: 2.0,
            cooldown_ms: 5_000,
        }
    }
}

/// Short sharp spike, bounded duration, plausible speed, low rotation.
#[derive(Debug)]
pub struct PotholeDetector {
    config: PotholeConfig,
    spike_start_ms: Option<u64>,
    peak_g: f64,
    max_rotation: f64,
    speed_at_spike: Option<f64>,
    last_triggered_ms: Option<u64>,
}

impl PotholeDetector {
    pub fn new(config: PotholeConfig) -> Self {
        Self {
            config,
            spike_start_ms: None,
            peak_g: 0.0,
            max_rotation: 0.0,
            speed_at_spike: None,
            last_triggered_ms: None,
        }
    }

    pub fn update(&mut self, sample: &FusedSample) -> Option<Detection> {
        if sample.linear_g >= self.config.spike_threshold_g {
            match self.spike_start_ms {
                None => {
                    self.spike_start_ms = Some(sample.timestamp_ms);
                    self.peak_g = sample.linear_g;
                    self.max_rotation = sample.rotation;
                    self.speed_at_spike = sample.speed_kmh;
                }
                Some(_) => {
                    self.peak_g = self.peak_g.max(sample.linear_g);
                    self.max_rotation = self.max_rotation.max(sample.rotation);
                }
            }
            return None;
        }

        // Spike ended; judge it
        let start = self.spike_start_ms.take()?;
        let duration = sample.timestamp_ms.saturating_sub(start);
        let peak = self.peak_g;
        let rotation = self.max_rotation;
        let speed = self.speed_at_spike;
        self.peak_g = 0.0;
        self.max_rotation = 0.0;
        self.speed_at_spike = None;

        if duration > self.config.max_spike_duration_ms {
            return None;
        }
        let speed = speed?;
        if speed < self.config.min_speed_kmh || speed > self.config.max_speed_kmh {
            return None;
        }
        if rotation > self.config.max_rotation_rad_s {
            return None;
        }
        if let Some(last) = self.last_triggered_ms {
            if sample.timestamp_ms.saturating_sub(last) < self.config.cooldown_ms {
                return None;
            }
        }

        self.last_triggered_ms = Some(sample.timestamp_ms);
        Some(Detection {
            kind: HazardKind::Pothole,
            severity: severity_scale(
                peak,
                self.config.spike_threshold_g,
                self.config.severity_span_g,
            ),
            impact_value: peak,
            timestamp_ms: sample.timestamp_ms,
            description: format!("pothole impact {:.2} g over {} ms", peak, duration),
        })
    }
}

impl Default for PotholeDetector {
    fn default() -> Self {
        Self::new(PotholeConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Rough road
// ---------------------------------------------------------------------------

/// Rough-road detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoughRoadConfig {
    /// Spike band, g; deliberately narrower than a pothole spike
    pub band_low_g: f64,
    pub band_high_g: f64,
    /// Sliding window the spikes must accumulate within
    pub window_ms: u64,
    /// Minimum spike count inside the window
    pub min_spikes: usize,
    /// Speed variance across the window above this means acceleration or
    /// braking, not surface texture, (km/h)²
    pub max_speed_variance: f64,
    pub cooldown_ms: u64,
}

impl Default for RoughRoadConfig {
    fn default() -> Self {
        Self {
            band_low_g: 0.35,
            band_high_g: 1.0,
            window_ms: 10_000,
            min_spikes: 5,
            max_speed_variance: 4.0,
            cooldown_ms: 15_000,
        }
    }
}

/// Repeated low-magnitude spikes with stable speed: sustained bad surface.
#[derive(Debug)]
pub struct RoughRoadDetector {
    config: RoughRoadConfig,
    spike_times: Vec<u64>,
    speeds: Vec<(u64, f64)>,
    prev_g: f64,
    last_triggered_ms: Option<u64>,
}

impl RoughRoadDetector {
    pub fn new(config: RoughRoadConfig) -> Self {
        Self {
            config,
            spike_times: Vec::new(),
            speeds: Vec::new(),
            prev_g: 0.0,
            last_triggered_ms: None,
        }
    }

    pub fn update(&mut self, sample: &FusedSample) -> Option<Detection> {
        let now = sample.timestamp_ms;
        let horizon = now.saturating_sub(self.config.window_ms);
        self.spike_times.retain(|&t| t >= horizon);
        self.speeds.retain(|&(t, _)| t >= horizon);

        // Rising edge into the band counts as one spike
        let rising = self.prev_g < self.config.band_low_g
            && sample.linear_g >= self.config.band_low_g
            && sample.linear_g <= self.config.band_high_g;
        self.prev_g = sample.linear_g;
        if rising {
            self.spike_times.push(now);
        }
        if let Some(speed) = sample.speed_kmh {
            self.speeds.push((now, speed));
        }

        if self.spike_times.len() < self.config.min_spikes {
            return None;
        }
        let variance = self.speed_variance()?;
        if variance > self.config.max_speed_variance {
            return None;
        }
        if let Some(last) = self.last_triggered_ms {
            if now.saturating_sub(last) < self.config.cooldown_ms {
                return None;
            }
        }

        let count = self.spike_times.len();
        self.last_triggered_ms = Some(now);
        self.spike_times.clear();
        Some(Detection {
            kind: HazardKind::RoughRoad,
            severity: (count as f64 / (2.0 * self.config.min_spikes as f64))
                .clamp(0.05, 1.0),
            impact_value: count as f64,
            timestamp_ms: now,
            description: format!("rough surface, {} jolts in window", count),
        })
    }

    fn speed_variance(&self) -> Option<f64> {
        if self.speeds.len() < 2 {
            return None;
        }
        let n = self.speeds.len() as f64;
        let mean = self.speeds.iter().map(|(_, s)| s).sum::<f64>() / n;
        Some(
            self.speeds
                .iter()
                .map(|(_, s)| (s - mean) * (s - mean))
                .sum::<f64>()
                / n,
        )
    }
}

impl Default for RoughRoadDetector {
    fn default() -> Self {
        Self::new(RoughRoadConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Crash risk
// ---------------------------------------------------------------------------

/// Crash-risk detector tuning.
///
/// The conjunction is deliberately strict: sustained high g AND a rapid
/// speed drop AND low post-impact speed AND elevated rotation must all
/// hold simultaneously, so hard braking alone never raises an SOS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashConfig {
    /// Sustained impact threshold, g; well above the pothole threshold
    pub impact_threshold_g: f64,
    /// Impact must stay above threshold at least this long
    pub min_impact_duration_ms: u64,
    /// Trailing window in which the speed drop must occur
    pub speed_drop_window_ms: u64,
    /// Required drop from the window's peak speed, km/h
    pub min_speed_drop_kmh: f64,
    /// Post-impact speed at or below this counts as stopped or fallen
    pub max_post_impact_kmh: f64,
    /// Rotation at or above this is a tumble/fall signature, rad/s
    pub min_rotation_rad_s: f64,
    /// Impact g mapped to severity 1.0 is threshold + this span
    pub severity_span_g: f64,
    pub cooldown_ms: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            impact_threshold_g: 3.5,
            min_impact_duration_ms: 400,
            speed_drop_window_ms: 3_000,
            min_speed_drop_kmh: 25.0,
            max_post_impact_kmh: 5.0,
            min_rotation_rad_s: 3.0,
            severity_span_g: 3.0,
            cooldown_ms: 30_000,
        }
    }
}

/// Sustained high-g impact with speed collapse and tumble rotation.
#[derive(Debug)]
pub struct CrashDetector {
    config: CrashConfig,
    impact_start_ms: Option<u64>,
    peak_g: f64,
    max_rotation: f64,
    fired_this_impact: bool,
    speed_history: Vec<(u64, f64)>,
    last_triggered_ms: Option<u64>,
}

impl CrashDetector {
    pub fn new(config: CrashConfig) -> Self {
        Self {
            config,
            impact_start_ms: None,
            peak_g: 0.0,
            max_rotation: 0.0,
            fired_this_impact: false,
            speed_history: Vec::new(),
            last_triggered_ms: None,
        }
    }

    pub fn update(&mut self, sample: &FusedSample) -> Option<Detection> {
        let now = sample.timestamp_ms;
        let horizon = now.saturating_sub(self.config.speed_drop_window_ms);
        self.speed_history.retain(|&(t, _)| t >= horizon);
        if let Some(speed) = sample.speed_kmh {
            self.speed_history.push((now, speed));
        }

        if sample.linear_g < self.config.impact_threshold_g {
            self.impact_start_ms = None;
            self.peak_g = 0.0;
            self.max_rotation = 0.0;
            self.fired_this_impact = false;
            return None;
        }

        let start = *self.impact_start_ms.get_or_insert(now);
        self.peak_g = self.peak_g.max(sample.linear_g);
        self.max_rotation = self.max_rotation.max(sample.rotation);

        if self.fired_this_impact {
            return None;
        }
        if now.saturating_sub(start) < self.config.min_impact_duration_ms {
            return None;
        }

        // All four conditions must hold simultaneously
        let current_speed = sample.speed_kmh?;
        if current_speed > self.config.max_post_impact_kmh {
            return None;
        }
        let window_peak = self
            .speed_history
            .iter()
            .map(|&(_, s)| s)
            .fold(f64::NEG_INFINITY, f64::max);
        if window_peak - current_speed < self.config.min_speed_drop_kmh {
            return None;
        }
        if self.max_rotation < self.config.min_rotation_rad_s {
            return None;
        }
        if let Some(last) = self.last_triggered_ms {
            if now.saturating_sub(last) < self.config.cooldown_ms {
                return None;
            }
        }

        self.fired_this_impact = true;
        self.last_triggered_ms = Some(now);
        Some(Detection {
            kind: HazardKind::CrashRisk,
            severity: severity_scale(
                self.peak_g,
                self.config.impact_threshold_g,
                self.config.severity_span_g,
            ),
            impact_value: self.peak_g,
            timestamp_ms: now,
            description: format!(
                "sustained impact {:.2} g, speed {:.0} -> {:.0} km/h",
                self.peak_g, window_peak, current_speed
            ),
        })
    }
}

impl Default for CrashDetector {
    fn default() -> Self {
        Self::new(CrashConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Overspeed
// ---------------------------------------------------------------------------

/// Overspeed detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverspeedConfig {
    /// Speed limit, km/h
    pub threshold_kmh: f64,
    /// Consecutive reliable readings required (debounce)
    pub required_readings: u32,
    /// Fixes worse than this accuracy are ignored, meters
    pub max_accuracy_m: f64,
    /// Excess speed mapped to severity 1.0 is threshold + this span
    pub severity_span_kmh: f64,
    pub cooldown_ms: u64,
}

impl Default for OverspeedConfig {
    fn default() -> Self {
        Self {
            threshold_kmh: 60.0,
            required_readings: 3,
            max_accuracy_m: 20.0,
            severity_span_kmh: 40.0,
            cooldown_ms: 30_000,
        }
    }
}

/// Debounced GPS speed-limit detector; driven by fixes, not accel samples.
#[derive(Debug)]
pub struct OverspeedDetector {
    config: OverspeedConfig,
    consecutive: u32,
    last_triggered_ms: Option<u64>,
}

impl OverspeedDetector {
    pub fn new(config: OverspeedConfig) -> Self {
        Self {
            config,
            consecutive: 0,
            last_triggered_ms: None,
        }
    }

    pub fn on_gps(&mut self, fix: &GpsFix) -> Option<Detection> {
        // One noisy fix neither counts toward nor breaks the streak
        if fix.accuracy_m > self.config.max_accuracy_m {
            return None;
        }
        if fix.speed_kmh <= self.config.threshold_kmh {
            self.consecutive = 0;
            return None;
        }

        self.consecutive += 1;
        if self.consecutive < self.config.required_readings {
            return None;
        }
        if let Some(last) = self.last_triggered_ms {
            if fix.timestamp_ms.saturating_sub(last) < self.config.cooldown_ms {
                return None;
            }
        }

        self.last_triggered_ms = Some(fix.timestamp_ms);
        self.consecutive = 0;
        Some(Detection {
            kind: HazardKind::Overspeed,
            severity: severity_scale(
                fix.speed_kmh,
                self.config.threshold_kmh,
                self.config.severity_span_kmh,
            ),
            impact_value: fix.speed_kmh,
            timestamp_ms: fix.timestamp_ms,
            description: format!("sustained {:.0} km/h", fix.speed_kmh),
        })
    }
}

impl Default for OverspeedDetector {
    fn default() -> Self {
        Self::new(OverspeedConfig::default())
    }
}
