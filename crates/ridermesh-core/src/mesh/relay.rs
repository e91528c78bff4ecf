//! Mesh relay engine
//!
//! Decides, for every inbound and outbound packet, whether to drop,
//! relay, deliver, or expire, and bridges across the transport adapters.
//! The engine is the only writer of packet lifecycle state; transports
//! never retain packet state past a single call, and the registry only
//! stores what the engine decides.
//!
//! Decision order on ingest is deliberate: dedup strictly precedes the
//! TTL check, so a duplicate that has also exceeded its hop budget is
//! reported as `duplicateDropped` — the first-seen copy already recorded
//! (or will record) the expiry outcome.
//!
//! The safety property of origination is "the packet exists and will
//! keep trying", not "the call succeeds": with no relay path and no
//! internet, a packet parks in `Pending` and is retried on every
//! discovery tick until a peer appears.

use super::packet::{now_ms, MeshPacket, PacketState, PacketStatus};
use super::registry::{PacketRegistry, RegistryStats};
use super::transport::Transport;
use crate::events::EventBus;
use crate::external::ConnectivityProbe;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors reported synchronously, before any state mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// TTL must permit at least one hop
    #[error("ttl must be greater than zero")]
    InvalidTtl,
}

/// Relay engine tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Hop budget for packets originated without an explicit TTL
    pub default_ttl: u8,
    /// How often `tick` retries packets parked in `Pending`
    pub retry_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_ttl: 5,
            retry_interval: Duration::from_secs(2),
        }
    }
}

/// The relay decision core for one device.
///
/// Owns the shared packet registry (the single lock boundary across
/// transports), an ordered adapter list tried in priority order
/// (short-range first, ad-hoc link second, simulated relay last), and
/// the outward `PacketState` event stream.
pub struct RelayEngine {
    registry: Arc<Mutex<PacketRegistry>>,
    transports: Vec<Box<dyn Transport>>,
    probe: Box<dyn ConnectivityProbe>,
    events: EventBus<PacketState>,
    config: RelayConfig,
    since_retry: Duration,
}

impl RelayEngine {
    pub fn new(
        mut transports: Vec<Box<dyn Transport>>,
        probe: Box<dyn ConnectivityProbe>,
        config: RelayConfig,
    ) -> Self {
        transports.sort_by_key(|t| t.kind());
        Self {
            registry: Arc::new(Mutex::new(PacketRegistry::new())),
            transports,
            probe,
            events: EventBus::default(),
            config,
            since_retry: Duration::ZERO,
        }
    }

    /// Handle to the shared registry, for read-only collaborators.
    pub fn registry(&self) -> Arc<Mutex<PacketRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Start discovery on every adapter.
    pub fn start_discovery(&mut self) {
        for transport in &mut self.transports {
            transport.start_discovery();
        }
    }

    /// Stop discovery on every adapter, halting outstanding scan timers.
    pub fn stop_discovery(&mut self) {
        for transport in &mut self.transports {
            transport.stop_discovery();
        }
    }

    /// Total active peers across adapters (reporting only; dedup never
    /// consults peer state).
    pub fn peer_count(&mut self) -> usize {
        self.transports.iter_mut().map(|t| t.peers().len()).sum()
    }

    /// Originate a new alert packet on this device.
    ///
    /// Rejects `ttl == 0` before any state mutation. Otherwise the packet
    /// is marked seen, recorded, announced with a `created` event, and
    /// relay is attempted immediately through the adapter priority order.
    pub fn originate(
        &mut self,
        origin: &str,
        lat: f64,
        lng: f64,
        ttl: u8,
    ) -> Result<MeshPacket, RelayError> {
        if ttl == 0 {
            return Err(RelayError::InvalidTtl);
        }

        let packet = MeshPacket::new(origin, lat, lng, ttl);
        {
            let mut registry = self.registry.lock().unwrap();
            registry.mark_seen(&packet.id);
            registry.record(&packet);
        }
        info!(id = %packet.id, origin, ttl, "alert originated");
        self.emit(&packet, "alert originated");

        Ok(self.attempt_relay(packet))
    }

    /// Originate with the configured default TTL.
    pub fn originate_default(
        &mut self,
        origin: &str,
        lat: f64,
        lng: f64,
    ) -> Result<MeshPacket, RelayError> {
        self.originate(origin, lat, lng, self.config.default_ttl)
    }

    /// Apply the relay decision to a packet arriving from a peer.
    pub fn ingest(&mut self, packet: &MeshPacket, from_peer: &str) -> MeshPacket {
        // Dedup strictly precedes the TTL check.
        let already_seen = {
            let mut registry = self.registry.lock().unwrap();
            if registry.has_seen(&packet.id) {
                registry.note_duplicate();
                true
            } else {
                registry.mark_seen(&packet.id);
                false
            }
        };

        if already_seen {
            debug!(id = %packet.id, from_peer, "duplicate dropped");
            let dropped = packet.with_status(PacketStatus::DuplicateDropped);
            self.emit(&dropped, format!("duplicate from {} dropped", from_peer));
            return dropped;
        }

        if packet.is_expired() {
            let expired = packet.with_status(PacketStatus::Expired);
            self.registry.lock().unwrap().record(&expired);
            debug!(id = %packet.id, hop = packet.hop, ttl = packet.ttl, "hop budget exhausted");
            self.emit(&expired, "hop budget exhausted");
            return expired;
        }

        let mut forwarding = packet.clone();
        forwarding.hop += 1;
        forwarding.status = PacketStatus::Forwarding;
        forwarding.last_peer = Some(from_peer.to_string());
        self.registry.lock().unwrap().record(&forwarding);
        debug!(id = %forwarding.id, hop = forwarding.hop, from_peer, "relaying onward");
        self.emit(&forwarding, format!("relayed via {}", from_peer));

        // Opportunistic escape hatch: any relaying device that has
        // connectivity phones out on behalf of the whole alert.
        let delivered = self.check_internet_and_try_deliver(&forwarding);
        if delivered.status == PacketStatus::Delivered {
            return delivered;
        }

        self.propagate(forwarding)
    }

    /// Probe connectivity and hand the packet to the internet if possible.
    ///
    /// On success the packet is terminal immediately, regardless of its
    /// remaining hop budget.
    pub fn check_internet_and_try_deliver(&mut self, packet: &MeshPacket) -> MeshPacket {
        if packet.status.is_terminal() {
            return packet.clone();
        }
        if !self.probe.has_internet() {
            return packet.clone();
        }

        let mut delivered = packet.with_status(PacketStatus::Delivered);
        delivered.delivered_at_ms = Some(now_ms());
        self.registry.lock().unwrap().record(&delivered);
        info!(id = %delivered.id, "alert handed off to internet");
        self.emit(&delivered, "handed off to internet");
        delivered
    }

    /// Periodic drive: drain adapter receive queues, retry parked
    /// packets, refresh peers.
    pub fn tick(&mut self, elapsed: Duration) {
        let mut inbound = Vec::new();
        for transport in &mut self.transports {
            inbound.extend(transport.poll_receive());
        }
        for (packet, from_peer) in inbound {
            self.ingest(&packet, &from_peer);
        }

        self.since_retry += elapsed;
        if self.since_retry >= self.config.retry_interval {
            self.since_retry = Duration::ZERO;
            self.retry_pending();
        }
    }

    /// Drain queued events.
    pub fn poll_events(&mut self) -> Vec<PacketState> {
        self.events.drain()
    }

    /// Read-only subscription to the event stream.
    pub fn subscribe(&mut self) -> Receiver<PacketState> {
        self.events.subscribe()
    }

    /// Lifetime counters from the registry.
    pub fn stats(&self) -> RegistryStats {
        self.registry.lock().unwrap().stats()
    }

    /// Try every adapter in priority order; park in `Pending` when no
    /// path exists and the internet probe fails.
    fn attempt_relay(&mut self, packet: MeshPacket) -> MeshPacket {
        let relayed = self.propagate(packet);
        if relayed.status == PacketStatus::Forwarding
            || relayed.status.is_terminal()
        {
            return relayed;
        }

        let delivered = self.check_internet_and_try_deliver(&relayed);
        if delivered.status == PacketStatus::Delivered {
            return delivered;
        }

        let parked = relayed.with_status(PacketStatus::Pending);
        self.registry.lock().unwrap().record(&parked);
        warn!(id = %parked.id, "no relay path; packet retained");
        self.emit(&parked, "no relay path; retained for retry");
        parked
    }

    /// Hand a packet to the first adapter that reaches a peer.
    ///
    /// Send failures are absorbed here and retried on the next tick;
    /// they never escalate to the caller.
    fn propagate(&mut self, packet: MeshPacket) -> MeshPacket {
        if packet.hop >= packet.ttl {
            return packet;
        }
        // Find the first adapter that advances the packet, then record and
        // emit with the transport borrow released.
        let mut outcome = None;
        for transport in &mut self.transports {
            if transport.peers().is_empty() {
                continue;
            }
            let sent = transport.broadcast(&packet);
            let label = transport.kind().label();
            if sent.hop > packet.hop {
                outcome = Some((sent, label));
                break;
            }
            debug!(id = %packet.id, transport = label, "broadcast reached no peers");
        }

        let Some((sent, label)) = outcome else {
            return packet;
        };
        self.registry.lock().unwrap().record(&sent);
        debug!(id = %sent.id, transport = label, hop = sent.hop, "broadcast");
        self.emit(&sent, format!("broadcast via {}", label));
        sent
    }

    /// Give parked packets another chance when peers appear or
    /// connectivity returns.
    fn retry_pending(&mut self) {
        let pending = self.registry.lock().unwrap().pending();
        for packet in pending {
            let delivered = self.check_internet_and_try_deliver(&packet);
            if delivered.status == PacketStatus::Delivered {
                continue;
            }
            let relayed = self.propagate(packet);
            if relayed.status == PacketStatus::Forwarding {
                debug!(id = %relayed.id, "pending packet found a relay path");
            }
        }
    }

    fn emit(&mut self, packet: &MeshPacket, message: impl Into<String>) {
        self.events.publish(PacketState::of(packet, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FixedProbe;
    use crate::mesh::transport::{LinkBus, LinkTransport, SimulatedRelay, TransportKind};

    fn offline_engine() -> RelayEngine {
        // No adapters at all: originate must park packets in Pending.
        RelayEngine::new(Vec::new(), Box::new(FixedProbe(false)), RelayConfig::default())
    }

    fn engine_with_sim(online: bool) -> RelayEngine {
        let mut sim = SimulatedRelay::new();
        sim.start_discovery();
        RelayEngine::new(
            vec![Box::new(sim)],
            Box::new(FixedProbe(online)),
            RelayConfig::default(),
        )
    }

    #[test]
    fn test_originate_rejects_zero_ttl() {
        let mut engine = offline_engine();
        let err = engine.originate("rider-1", 0.0, 0.0, 0).unwrap_err();
        assert_eq!(err, RelayError::InvalidTtl);
        // Rejected before any mutation
        assert_eq!(engine.registry.lock().unwrap().len(), 0);
        assert!(engine.poll_events().is_empty());
    }

    #[test]
    fn test_originate_emits_created_then_parks_pending() {
        let mut engine = offline_engine();
        let packet = engine.originate("rider-1", 12.97, 77.59, 3).unwrap();

        assert_eq!(packet.status, PacketStatus::Pending);
        assert_eq!(packet.hop, 0);

        let events = engine.poll_events();
        assert_eq!(events[0].status, PacketStatus::Created);
        assert_eq!(events[0].packet.hop, 0);
        assert_eq!(events.last().unwrap().status, PacketStatus::Pending);

        // Retained, not lost
        let registry = engine.registry();
        assert!(registry.lock().unwrap().has_seen(&packet.id));
        assert_eq!(registry.lock().unwrap().pending().len(), 1);
    }

    #[test]
    fn test_originate_relays_through_simulated_fallback() {
        let mut engine = engine_with_sim(false);
        let packet = engine.originate("rider-1", 12.97, 77.59, 3).unwrap();
        assert_eq!(packet.status, PacketStatus::Forwarding);
        assert_eq!(packet.hop, 1);
        assert_eq!(packet.last_peer.as_deref(), Some("sim-relay"));
    }

    #[test]
    fn test_broadcast_recorded_and_announced() {
        let mut engine = engine_with_sim(false);
        let packet = engine.originate("rider-1", 0.0, 0.0, 3).unwrap();

        // The advanced hop is stored before the event goes out
        let registry = engine.registry();
        assert_eq!(registry.lock().unwrap().get(&packet.id).unwrap().hop, 1);
        assert!(engine
            .poll_events()
            .iter()
            .any(|e| e.message == "broadcast via simulated"));
    }

    #[test]
    fn test_originate_delivers_when_online_and_no_peers() {
        let mut engine = RelayEngine::new(
            Vec::new(),
            Box::new(FixedProbe(true)),
            RelayConfig::default(),
        );
        let packet = engine.originate("rider-1", 0.0, 0.0, 3).unwrap();
        assert_eq!(packet.status, PacketStatus::Delivered);
        assert!(packet.delivered_at_ms.is_some());
    }

    #[test]
    fn test_ingest_forwarding_then_duplicate() {
        let mut sender = offline_engine();
        let packet = sender.originate("rider-1", 12.97, 77.59, 3).unwrap();

        // Separate relaying device
        let mut relay = offline_engine();
        let first = relay.ingest(&packet, "peer-A");
        assert_eq!(first.status, PacketStatus::Forwarding);
        assert_eq!(first.hop, 1);
        assert_eq!(first.last_peer.as_deref(), Some("peer-A"));

        let second = relay.ingest(&packet, "peer-A");
        assert_eq!(second.status, PacketStatus::DuplicateDropped);
        assert_eq!(relay.stats().duplicates_dropped, 1);
    }

    #[test]
    fn test_ingest_own_originated_packet_is_duplicate() {
        let mut engine = offline_engine();
        let packet = engine.originate("rider-1", 0.0, 0.0, 3).unwrap();
        let echoed = engine.ingest(&packet, "peer-B");
        assert_eq!(echoed.status, PacketStatus::DuplicateDropped);
    }

    #[test]
    fn test_ingest_expired_at_ttl() {
        let mut engine = offline_engine();
        let mut packet = MeshPacket::new("rider-9", 0.0, 0.0, 3);
        packet.hop = 3;
        let out = engine.ingest(&packet, "peer-A");
        assert_eq!(out.status, PacketStatus::Expired);
        assert_eq!(out.hop, 3);
    }

    #[test]
    fn test_duplicate_beats_expired() {
        // A duplicate that has also exceeded TTL reports duplicateDropped.
        let mut engine = offline_engine();
        let mut packet = MeshPacket::new("rider-9", 0.0, 0.0, 3);
        packet.hop = 3;
        assert_eq!(
            engine.ingest(&packet, "peer-A").status,
            PacketStatus::Expired
        );
        assert_eq!(
            engine.ingest(&packet, "peer-A").status,
            PacketStatus::DuplicateDropped
        );
    }

    #[test]
    fn test_hop_non_decreasing_across_ingest() {
        let mut engine = offline_engine();
        let mut packet = MeshPacket::new("rider-9", 0.0, 0.0, 5);
        packet.hop = 2;
        let out = engine.ingest(&packet, "peer-A");
        assert!(out.hop >= 2);
        assert!(out.hop <= out.ttl);
    }

    #[test]
    fn test_ingest_delivers_opportunistically() {
        let mut engine = RelayEngine::new(
            Vec::new(),
            Box::new(FixedProbe(true)),
            RelayConfig::default(),
        );
        let packet = MeshPacket::new("rider-9", 0.0, 0.0, 5);
        let out = engine.ingest(&packet, "peer-A");
        assert_eq!(out.status, PacketStatus::Delivered);
        assert!(out.delivered_at_ms.is_some());
        // Delivered terminal even though hop budget remained
        assert!(out.hop < out.ttl);
    }

    #[test]
    fn test_deliver_is_noop_on_terminal_packet() {
        let mut engine = RelayEngine::new(
            Vec::new(),
            Box::new(FixedProbe(true)),
            RelayConfig::default(),
        );
        let packet = MeshPacket::new("rider-9", 0.0, 0.0, 5)
            .with_status(PacketStatus::Expired);
        let out = engine.check_internet_and_try_deliver(&packet);
        assert_eq!(out.status, PacketStatus::Expired);
    }

    #[test]
    fn test_pending_retried_when_peer_appears() {
        let bus = LinkBus::new();
        let transport =
            LinkTransport::new(TransportKind::ShortRange, "dev-a", "A", bus.clone());
        let mut engine = RelayEngine::new(
            vec![Box::new(transport)],
            Box::new(FixedProbe(false)),
            RelayConfig {
                retry_interval: Duration::from_millis(0),
                ..RelayConfig::default()
            },
        );
        engine.start_discovery();

        // Alone on the bus: parks pending
        let packet = engine.originate("rider-1", 0.0, 0.0, 3).unwrap();
        assert_eq!(packet.status, PacketStatus::Pending);

        // A peer joins; the next tick finds a path
        let mut peer =
            LinkTransport::new(TransportKind::ShortRange, "dev-b", "B", bus);
        peer.start_discovery();
        engine.tick(Duration::from_millis(1));

        let registry = engine.registry();
        let stored = registry.lock().unwrap().get(&packet.id).cloned().unwrap();
        assert_eq!(stored.status, PacketStatus::Forwarding);
        assert_eq!(stored.hop, 1);

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(peer.poll_receive().len(), 1);
    }

    #[test]
    fn test_tick_ingests_inbound_packets() {
        let bus = LinkBus::new();
        let mut sender =
            LinkTransport::new(TransportKind::ShortRange, "dev-a", "A", bus.clone());
        sender.start_discovery();

        let receiver =
            LinkTransport::new(TransportKind::ShortRange, "dev-b", "B", bus);
        let mut engine = RelayEngine::new(
            vec![Box::new(receiver)],
            Box::new(FixedProbe(false)),
            RelayConfig::default(),
        );
        engine.start_discovery();

        let packet = MeshPacket::new("rider-a", 0.0, 0.0, 3);
        sender.broadcast(&packet);
        std::thread::sleep(Duration::from_millis(15));

        engine.tick(Duration::from_millis(10));
        let events = engine.poll_events();
        assert!(events
            .iter()
            .any(|e| e.status == PacketStatus::Forwarding && e.packet.id == packet.id));
    }

    #[test]
    fn test_subscriber_sees_total_order_per_id() {
        let mut engine = offline_engine();
        let rx = engine.subscribe();
        let packet = engine.originate("rider-1", 0.0, 0.0, 3).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.packet.id, packet.id);
        assert_eq!(first.status, PacketStatus::Created);
        assert_eq!(second.status, PacketStatus::Pending);
    }
}
