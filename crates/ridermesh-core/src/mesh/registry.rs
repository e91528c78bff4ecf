//! Packet registry: the origin of truth for dedup and packet lifecycle
//!
//! The registry owns two pieces of state shared across all transport
//! adapters: the seen-id set (loop prevention in a floodable mesh with no
//! routing table) and the authoritative packet records. It holds no
//! dedup or TTL *policy* — the relay engine decides outcomes and the
//! registry only serializes and stores them.
//!
//! `mark_seen` exists separately from `record` so an id can be claimed
//! before its packet is processed, closing the race between concurrent
//! inbound copies of the same alert.

use super::packet::{MeshPacket, PacketStatus};
use std::collections::{HashMap, HashSet};

/// Counters over everything this device has originated or relayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Packets originated on this device
    pub originated: u64,
    /// Packets forwarded onward for other riders
    pub relayed: u64,
    /// Duplicates dropped by the dedup check
    pub duplicates_dropped: u64,
    /// Packets expired on hop budget
    pub expired: u64,
    /// Packets handed off to the internet
    pub delivered: u64,
    /// Packets parked awaiting a relay path
    pub pending: u64,
}

/// Authoritative store for packet records and the seen-id set.
#[derive(Debug, Default)]
pub struct PacketRegistry {
    packets: HashMap<String, MeshPacket>,
    seen: HashSet<String>,
    stats: RegistryStats,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) membership test against every id ever ingested or originated,
    /// independent of the packet's current status.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Register an id before its packet is processed.
    pub fn mark_seen(&mut self, id: &str) {
        self.seen.insert(id.to_string());
    }

    /// Idempotently store or update a packet by id.
    ///
    /// Safe to call repeatedly with monotonically advancing hop/status:
    /// a stored terminal status is never regressed and `hop` never
    /// decreases, so replaying an older snapshot is a no-op.
    pub fn record(&mut self, packet: &MeshPacket) {
        if let Some(existing) = self.packets.get(&packet.id) {
            if existing.status.is_terminal() {
                return;
            }
            if packet.hop < existing.hop {
                return;
            }
            if existing == packet {
                return;
            }
        }
        self.bump_stats(packet.status);
        self.packets.insert(packet.id.clone(), packet.clone());
    }

    fn bump_stats(&mut self, status: PacketStatus) {
        match status {
            PacketStatus::Created => self.stats.originated += 1,
            PacketStatus::Forwarding => self.stats.relayed += 1,
            PacketStatus::Pending => self.stats.pending += 1,
            PacketStatus::Delivered => self.stats.delivered += 1,
            PacketStatus::Expired => self.stats.expired += 1,
            PacketStatus::DuplicateDropped => self.stats.duplicates_dropped += 1,
            PacketStatus::Failed => {}
        }
    }

    /// Count a duplicate outcome.
    ///
    /// Duplicate copies are never recorded; the first-seen copy stays
    /// authoritative and already carries (or will carry) the real
    /// terminal outcome.
    pub fn note_duplicate(&mut self) {
        self.stats.duplicates_dropped += 1;
    }

    /// Look up a packet by id.
    pub fn get(&self, id: &str) -> Option<&MeshPacket> {
        self.packets.get(id)
    }

    /// All packets currently parked in `Pending`, awaiting a relay path.
    pub fn pending(&self) -> Vec<MeshPacket> {
        self.packets
            .values()
            .filter(|p| p.status == PacketStatus::Pending)
            .cloned()
            .collect()
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    /// Number of packet records held.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::packet::MeshPacket;

    #[test]
    fn test_mark_seen_before_record() {
        let mut registry = PacketRegistry::new();
        let packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);

        assert!(!registry.has_seen(&packet.id));
        registry.mark_seen(&packet.id);
        assert!(registry.has_seen(&packet.id));
        // Seen is independent of whether a record exists
        assert!(registry.get(&packet.id).is_none());
    }

    #[test]
    fn test_record_idempotent() {
        let mut registry = PacketRegistry::new();
        let packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);

        registry.record(&packet);
        let stats_once = registry.stats();
        registry.record(&packet);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats(), stats_once);
    }

    #[test]
    fn test_record_advances_with_hop() {
        let mut registry = PacketRegistry::new();
        let mut packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        registry.record(&packet);

        packet.hop = 1;
        packet.status = PacketStatus::Forwarding;
        registry.record(&packet);

        assert_eq!(registry.get(&packet.id).unwrap().hop, 1);
    }

    #[test]
    fn test_record_never_regresses_hop() {
        let mut registry = PacketRegistry::new();
        let mut packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        packet.hop = 2;
        packet.status = PacketStatus::Forwarding;
        registry.record(&packet);

        let mut stale = packet.clone();
        stale.hop = 1;
        registry.record(&stale);

        assert_eq!(registry.get(&packet.id).unwrap().hop, 2);
    }

    #[test]
    fn test_record_never_leaves_terminal() {
        let mut registry = PacketRegistry::new();
        let mut packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        packet.status = PacketStatus::Delivered;
        registry.record(&packet);

        let mut reborn = packet.clone();
        reborn.status = PacketStatus::Forwarding;
        reborn.hop = 3;
        registry.record(&reborn);

        assert_eq!(
            registry.get(&packet.id).unwrap().status,
            PacketStatus::Delivered
        );
    }

    #[test]
    fn test_pending_listing() {
        let mut registry = PacketRegistry::new();
        let mut parked = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        parked.status = PacketStatus::Pending;
        registry.record(&parked);
        registry.record(&MeshPacket::new("rider-2", 0.0, 0.0, 3));

        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, parked.id);
    }
}
