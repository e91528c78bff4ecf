//! Crash-to-alert bridge
//!
//! Turns a crash detection (or a manual trigger) into a
//! countdown-and-escalate workflow. The state machine is explicit and
//! clock-driven: an external tick source advances it, so no timer or UI
//! framework is baked in, and a cancelled countdown can never fire the
//! delayed escalation.
//!
//! ```text
//! idle ──arm──► counting ──expiry──► escalated (terminal until reset)
//!                  │
//!                cancel
//!                  ▼
//!                idle  (no side effects)
//! ```

use crate::events::EventBus;
use crate::mesh::relay::RelayEngine;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{error, info};

/// Bridge phase. `Escalated` is terminal until the surrounding ride
/// session resets the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    Counting,
    Escalated,
}

/// Observable bridge transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Countdown started at the given location
    Armed { lat: f64, lng: f64 },
    /// One countdown tick elapsed
    Tick { remaining_ms: u64 },
    /// Cancelled before expiry; back to idle
    Cancelled,
    /// Countdown expired and an alert was originated
    Escalated { packet_id: String },
}

/// Bridge tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Fixed countdown length before escalation
    pub countdown: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(15),
        }
    }
}

/// Countdown-and-escalate state machine for one rider.
pub struct SosBridge {
    rider: String,
    config: BridgeConfig,
    phase: BridgePhase,
    remaining: Duration,
    armed_at: Option<(f64, f64)>,
    events: EventBus<BridgeEvent>,
}

impl SosBridge {
    pub fn new(rider: &str, config: BridgeConfig) -> Self {
        Self {
            rider: rider.to_string(),
            config,
            phase: BridgePhase::Idle,
            remaining: Duration::ZERO,
            armed_at: None,
            events: EventBus::default(),
        }
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    /// Time left before escalation; zero outside `Counting`.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Start the countdown from a crash detection or a manual trigger.
    ///
    /// Only valid from `Idle`; arming while counting or escalated is a
    /// no-op so repeated crash events cannot restart a running countdown.
    pub fn arm(&mut self, lat: f64, lng: f64) {
        if self.phase != BridgePhase::Idle {
            return;
        }
        self.phase = BridgePhase::Counting;
        self.remaining = self.config.countdown;
        self.armed_at = Some((lat, lng));
        info!(rider = %self.rider, "SOS countdown armed");
        self.events.publish(BridgeEvent::Armed { lat, lng });
    }

    /// Rider is fine: stop the countdown before it fires.
    pub fn cancel(&mut self) {
        if self.phase != BridgePhase::Counting {
            return;
        }
        self.phase = BridgePhase::Idle;
        self.remaining = Duration::ZERO;
        self.armed_at = None;
        info!(rider = %self.rider, "SOS countdown cancelled");
        self.events.publish(BridgeEvent::Cancelled);
    }

    /// Advance the countdown; on expiry, originate the alert through the
    /// relay engine with the armed location.
    pub fn tick(&mut self, elapsed: Duration, relay: &mut RelayEngine) {
        if self.phase != BridgePhase::Counting {
            return;
        }
        self.remaining = self.remaining.saturating_sub(elapsed);
        if !self.remaining.is_zero() {
            self.events.publish(BridgeEvent::Tick {
                remaining_ms: self.remaining.as_millis() as u64,
            });
            return;
        }

        let (lat, lng) = self.armed_at.take().unwrap_or((0.0, 0.0));
        self.phase = BridgePhase::Escalated;
        match relay.originate_default(&self.rider, lat, lng) {
            Ok(packet) => {
                info!(rider = %self.rider, id = %packet.id, "SOS escalated");
                self.events
                    .publish(BridgeEvent::Escalated { packet_id: packet.id });
            }
            Err(err) => {
                // Only reachable through a misconfigured default TTL
                error!(rider = %self.rider, %err, "SOS origination rejected");
            }
        }
    }

    /// Ride session acknowledges the escalation and returns to idle.
    pub fn reset(&mut self) {
        if self.phase == BridgePhase::Escalated {
            self.phase = BridgePhase::Idle;
            self.remaining = Duration::ZERO;
        }
    }

    /// Drain queued bridge events.
    pub fn poll_events(&mut self) -> Vec<BridgeEvent> {
        self.events.drain()
    }

    /// Read-only subscription to bridge transitions.
    pub fn subscribe(&mut self) -> Receiver<BridgeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FixedProbe;
    use crate::mesh::packet::PacketStatus;
    use crate::mesh::relay::RelayConfig;

    fn offline_relay() -> RelayEngine {
        RelayEngine::new(Vec::new(), Box::new(FixedProbe(false)), RelayConfig::default())
    }

    fn bridge(countdown_ms: u64) -> SosBridge {
        SosBridge::new(
            "rider-1",
            BridgeConfig {
                countdown: Duration::from_millis(countdown_ms),
            },
        )
    }

    #[test]
    fn test_countdown_escalates_on_expiry() {
        let mut relay = offline_relay();
        let mut sos = bridge(300);

        sos.arm(12.97, 77.59);
        assert_eq!(sos.phase(), BridgePhase::Counting);

        sos.tick(Duration::from_millis(100), &mut relay);
        sos.tick(Duration::from_millis(100), &mut relay);
        assert_eq!(sos.phase(), BridgePhase::Counting);
        sos.tick(Duration::from_millis(100), &mut relay);
        assert_eq!(sos.phase(), BridgePhase::Escalated);

        let events = sos.poll_events();
        assert!(matches!(events[0], BridgeEvent::Armed { .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, BridgeEvent::Escalated { .. })));

        // The alert exists in the registry, parked pending (no peers)
        let registry = relay.registry();
        let registry = registry.lock().unwrap();
        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].origin, "rider-1");
        assert!((pending[0].lat - 12.97).abs() < 1e-9);
        assert_eq!(pending[0].status, PacketStatus::Pending);
    }

    #[test]
    fn test_cancel_before_expiry_never_fires() {
        let mut relay = offline_relay();
        let mut sos = bridge(300);

        sos.arm(0.0, 0.0);
        sos.tick(Duration::from_millis(100), &mut relay);
        sos.cancel();
        assert_eq!(sos.phase(), BridgePhase::Idle);

        // Further ticks are inert after a cancel
        sos.tick(Duration::from_secs(10), &mut relay);
        assert_eq!(sos.phase(), BridgePhase::Idle);
        assert_eq!(relay.stats().originated, 0);
        assert!(sos
            .poll_events()
            .iter()
            .any(|e| matches!(e, BridgeEvent::Cancelled)));
    }

    #[test]
    fn test_cancel_then_rearm() {
        let mut relay = offline_relay();
        let mut sos = bridge(200);

        sos.arm(0.0, 0.0);
        sos.cancel();
        sos.arm(1.0, 1.0);
        sos.tick(Duration::from_millis(200), &mut relay);

        assert_eq!(sos.phase(), BridgePhase::Escalated);
        assert_eq!(relay.stats().originated, 1);
    }

    #[test]
    fn test_arm_is_noop_while_counting() {
        let mut sos = bridge(500);
        sos.arm(0.0, 0.0);
        let before = sos.remaining();
        sos.arm(9.0, 9.0);
        assert_eq!(sos.remaining(), before);
    }

    #[test]
    fn test_escalated_terminal_until_reset() {
        let mut relay = offline_relay();
        let mut sos = bridge(100);

        sos.arm(0.0, 0.0);
        sos.tick(Duration::from_millis(100), &mut relay);
        assert_eq!(sos.phase(), BridgePhase::Escalated);

        // Arming and ticking do nothing while escalated
        sos.arm(1.0, 1.0);
        sos.tick(Duration::from_secs(1), &mut relay);
        assert_eq!(sos.phase(), BridgePhase::Escalated);
        assert_eq!(relay.stats().originated, 1);

        sos.reset();
        assert_eq!(sos.phase(), BridgePhase::Idle);
    }

    #[test]
    fn test_ticks_observable() {
        let mut relay = offline_relay();
        let mut sos = bridge(300);
        let rx = sos.subscribe();

        sos.arm(0.0, 0.0);
        sos.tick(Duration::from_millis(100), &mut relay);

        assert!(matches!(rx.try_recv().unwrap(), BridgeEvent::Armed { .. }));
        match rx.try_recv().unwrap() {
            BridgeEvent::Tick { remaining_ms } => assert_eq!(remaining_ms, 200),
            other => panic!("expected tick, got {:?}", other),
        }
    }
}
