//! Transport adapters
//!
//! Every radio the relay engine can reach peers through exposes the same
//! minimal contract, so the engine stays transport-agnostic: scoped
//! discovery start/stop, a pruned peer list, a best-effort broadcast, and
//! a drain-style receive. Payload size limits of the underlying radios
//! are why TTL + hop + origin is the entire addressing scheme.
//!
//! Two concrete adapters are provided:
//!
//! - [`LinkTransport`]: an in-memory radio over a shared [`LinkBus`],
//!   modelling both the short-range broadcast radio and the ad-hoc
//!   direct link (same medium, different [`TransportKind`]).
//! - [`SimulatedRelay`]: the software-only fallback used when no real
//!   adapter reports peers; it advances the hop count locally so an
//!   alert is never stranded just because the radios are quiet.

use super::packet::{MeshPacket, PacketStatus, WirePayload};
use super::peer::{Peer, PeerTable};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which physical (or simulated) medium an adapter drives.
///
/// The relay engine tries adapters in the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportKind {
    /// Short-range broadcast radio (BLE-class)
    ShortRange,
    /// Ad-hoc direct link (Wi-Fi Direct-class)
    AdHocLink,
    /// Software-only simulated relay, last-resort fallback
    Simulated,
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::ShortRange => "short-range",
            TransportKind::AdHocLink => "ad-hoc",
            TransportKind::Simulated => "simulated",
        }
    }
}

/// Uniform adapter contract the relay engine programs against.
pub trait Transport: Send {
    /// Which medium this adapter drives.
    fn kind(&self) -> TransportKind;

    /// Begin scanning/advertising. Idempotent and restartable.
    fn start_discovery(&mut self);

    /// Stop scanning and halt outstanding scan timers. Idempotent.
    fn stop_discovery(&mut self);

    fn is_discovering(&self) -> bool;

    /// Current known-good peers, pruned of stale entries.
    fn peers(&mut self) -> Vec<Peer>;

    /// Best-effort send to every reachable peer.
    ///
    /// Advances `hop` once per peer actually reached (bounded per-peer
    /// relay latency is simulated on the receiving side) and stamps
    /// `last_peer`. With zero peers the packet is returned unchanged.
    fn broadcast(&mut self, packet: &MeshPacket) -> MeshPacket;

    /// Drain decoded `(packet, from_peer)` pairs that have arrived since
    /// the last poll. Malformed payloads are dropped at decode and never
    /// surface here.
    fn poll_receive(&mut self) -> Vec<(MeshPacket, String)>;
}

/// One queued delivery on the bus.
#[derive(Debug)]
struct Delivery {
    bytes: Vec<u8>,
    from: String,
    deliver_at: Instant,
}

#[derive(Debug, Default)]
struct Endpoint {
    name: String,
    inbox: VecDeque<Delivery>,
}

#[derive(Debug)]
struct BusInner {
    endpoints: HashMap<String, Endpoint>,
    /// Probability a given per-peer send is lost in transit
    loss: f64,
    /// Simulated per-hop relay latency
    latency: Duration,
}

/// Shared in-memory medium connecting [`LinkTransport`] endpoints.
///
/// Stands in for the radio channel: attached endpoints see each other
/// as peers, sends are queued with bounded latency, and a configurable
/// loss rate models a lossy channel for tests.
#[derive(Debug, Clone)]
pub struct LinkBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LinkBus {
    pub fn new() -> Self {
        Self::with_conditions(0.0, Duration::from_millis(10))
    }

    /// Bus with explicit channel conditions.
    pub fn with_conditions(loss: f64, latency: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                endpoints: HashMap::new(),
                loss: loss.clamp(0.0, 1.0),
                latency,
            })),
        }
    }

    fn attach(&self, id: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.entry(id.to_string()).or_insert(Endpoint {
            name: name.to_string(),
            inbox: VecDeque::new(),
        });
    }

    fn detach(&self, id: &str) {
        self.inner.lock().unwrap().endpoints.remove(id);
    }

    /// Endpoints visible to `id`, with a synthetic signal strength.
    fn visible_from(&self, id: &str) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        inner
            .endpoints
            .iter()
            .filter(|(other, _)| other.as_str() != id)
            .map(|(other, ep)| (other.clone(), ep.name.clone()))
            .collect()
    }

    /// Queue a send; returns false when the channel drops it.
    fn send(&self, from: &str, to: &str, bytes: Vec<u8>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.loss > 0.0 && rand::thread_rng().gen::<f64>() < inner.loss {
            return false;
        }
        let deliver_at = Instant::now() + inner.latency;
        match inner.endpoints.get_mut(to) {
            Some(ep) => {
                ep.inbox.push_back(Delivery {
                    bytes,
                    from: from.to_string(),
                    deliver_at,
                });
                true
            }
            None => false,
        }
    }

    /// Drain deliveries for `id` whose latency window has elapsed.
    fn drain_ready(&self, id: &str) -> Vec<(Vec<u8>, String)> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let Some(ep) = inner.endpoints.get_mut(id) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        let mut waiting = VecDeque::new();
        while let Some(delivery) = ep.inbox.pop_front() {
            if delivery.deliver_at <= now {
                ready.push((delivery.bytes, delivery.from));
            } else {
                waiting.push_back(delivery);
            }
        }
        ep.inbox = waiting;
        ready
    }
}

impl Default for LinkBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Radio adapter over a [`LinkBus`].
pub struct LinkTransport {
    kind: TransportKind,
    device_id: String,
    bus: LinkBus,
    peer_table: PeerTable,
    discovering: bool,
}

impl LinkTransport {
    pub fn new(kind: TransportKind, device_id: &str, device_name: &str, bus: LinkBus) -> Self {
        bus.attach(device_id, device_name);
        Self {
            kind,
            device_id: device_id.to_string(),
            bus,
            peer_table: PeerTable::default(),
            discovering: false,
        }
    }

    fn refresh_peers(&mut self) {
        for (id, name) in self.bus.visible_from(&self.device_id) {
            // Synthetic signal strength; a real radio reports this
            let rssi = rand::thread_rng().gen_range(-85.0..-45.0);
            self.peer_table.update(&id, &name, rssi);
        }
        self.peer_table.prune_stale();
    }
}

impl Transport for LinkTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn start_discovery(&mut self) {
        if !self.discovering {
            debug!(transport = self.kind.label(), "discovery started");
        }
        self.discovering = true;
    }

    fn stop_discovery(&mut self) {
        if self.discovering {
            debug!(transport = self.kind.label(), "discovery stopped");
        }
        self.discovering = false;
        self.peer_table.clear();
    }

    fn is_discovering(&self) -> bool {
        self.discovering
    }

    fn peers(&mut self) -> Vec<Peer> {
        if !self.discovering {
            return Vec::new();
        }
        self.refresh_peers();
        self.peer_table.active()
    }

    fn broadcast(&mut self, packet: &MeshPacket) -> MeshPacket {
        let peers = self.peers();
        if peers.is_empty() {
            return packet.clone();
        }

        let mut relayed = packet.clone();
        for peer in &peers {
            if relayed.hop >= relayed.ttl {
                break;
            }
            // Each reached peer counts as one relay transit
            let mut next = relayed.clone();
            next.hop += 1;
            next.last_peer = Some(peer.id.clone());
            next.status = PacketStatus::Forwarding;
            let Some(bytes) = WirePayload::from_packet(&next).to_bytes() else {
                warn!(id = %packet.id, "payload exceeds radio MTU, not sent");
                return relayed;
            };
            if self.bus.send(&self.device_id, &peer.id, bytes) {
                relayed = next;
            } else {
                debug!(id = %packet.id, peer = %peer.id, "send dropped by channel");
            }
        }
        relayed
    }

    fn poll_receive(&mut self) -> Vec<(MeshPacket, String)> {
        self.bus
            .drain_ready(&self.device_id)
            .into_iter()
            .filter_map(|(bytes, from)| {
                let payload = WirePayload::from_bytes(&bytes)?;
                Some((payload.into_packet(), from))
            })
            .collect()
    }
}

impl Drop for LinkTransport {
    fn drop(&mut self) {
        self.bus.detach(&self.device_id);
    }
}

/// Software-only fallback relay.
///
/// Reports one synthetic peer and advances the hop count locally, so an
/// originated alert always makes progress even with every radio silent.
pub struct SimulatedRelay {
    discovering: bool,
    peer: Peer,
}

impl SimulatedRelay {
    pub fn new() -> Self {
        Self {
            discovering: false,
            peer: Peer::new("sim-relay", "Simulated relay", -60.0),
        }
    }
}

impl Default for SimulatedRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedRelay {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    fn start_discovery(&mut self) {
        self.discovering = true;
    }

    fn stop_discovery(&mut self) {
        self.discovering = false;
    }

    fn is_discovering(&self) -> bool {
        self.discovering
    }

    fn peers(&mut self) -> Vec<Peer> {
        if !self.discovering {
            return Vec::new();
        }
        vec![self.peer.clone()]
    }

    fn broadcast(&mut self, packet: &MeshPacket) -> MeshPacket {
        if !self.discovering || packet.hop >= packet.ttl {
            return packet.clone();
        }
        let mut relayed = packet.clone();
        relayed.hop += 1;
        relayed.last_peer = Some(self.peer.id.clone());
        relayed.status = PacketStatus::Forwarding;
        relayed
    }

    fn poll_receive(&mut self) -> Vec<(MeshPacket, String)> {
        Vec::new()
    }
}
