//! Mesh packet types and wire framing
//!
//! This module defines the emergency alert packet that floods the rider
//! mesh. The addressing scheme is deliberately tiny: origin + TTL + hop
//! count is all a packet carries, because the underlying radios impose
//! hard payload limits that rule out signatures or path vectors.
//!
//! ## Lifecycle
//!
//! ```text
//! created ──► forwarding ──► forwarding (further hops)
//!    │             │
//!    │             ├──► delivered        (internet found mid-relay)
//!    │             ├──► expired          (hop budget exhausted)
//!    │             └──► duplicateDropped (dedup race)
//!    └──► pending ──► forwarding | delivered
//!
//! delivered / expired / duplicateDropped / failed are terminal.
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lifecycle state of a mesh packet.
///
/// `Created` is the only valid initial state. The last four states are
/// terminal: once a packet is delivered, expired, dropped as a duplicate,
/// or failed, no further transition is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketStatus {
    /// Freshly originated on this device, not yet relayed
    Created,
    /// In transit through the mesh, hop budget remaining
    Forwarding,
    /// No relay path currently exists; retained for future attempts
    Pending,
    /// Handed off to the internet by some relaying device
    Delivered,
    /// Hop budget exhausted before delivery
    Expired,
    /// Dropped by the dedup check (loop prevention)
    DuplicateDropped,
    /// Transport-level failure recorded for observability
    Failed,
}

impl PacketStatus {
    /// Terminal states end a packet's active life.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PacketStatus::Delivered
                | PacketStatus::Expired
                | PacketStatus::DuplicateDropped
                | PacketStatus::Failed
        )
    }

    /// States in which the `hop <= ttl` invariant must hold.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PacketStatus::Created => "created",
            PacketStatus::Forwarding => "forwarding",
            PacketStatus::Pending => "pending",
            PacketStatus::Delivered => "delivered",
            PacketStatus::Expired => "expired",
            PacketStatus::DuplicateDropped => "duplicateDropped",
            PacketStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// An emergency alert unit flooding the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPacket {
    /// Globally unique identifier; the sole dedup key
    pub id: String,
    /// Rider identifier of the originating device
    pub origin: String,
    /// Origin latitude at creation time
    pub lat: f64,
    /// Origin longitude at creation time
    pub lng: f64,
    /// Number of relays traversed so far (never decreases)
    pub hop: u8,
    /// Maximum permitted hops
    pub ttl: u8,
    /// Lifecycle state
    pub status: PacketStatus,
    /// Creation time, UTC epoch milliseconds
    pub created_at_ms: u64,
    /// Peer that most recently touched the packet
    pub last_peer: Option<String>,
    /// Set only on successful internet handoff
    pub delivered_at_ms: Option<u64>,
}

impl MeshPacket {
    /// Create a new packet originated by this device.
    ///
    /// The id is `{origin}-{epoch_millis}-{random suffix}`. The origin
    /// prefix namespaces ids across riders, so two devices originating
    /// in the same millisecond cannot collide; the random suffix covers
    /// same-origin creation within one millisecond.
    pub fn new(origin: &str, lat: f64, lng: f64, ttl: u8) -> Self {
        let created_at_ms = now_ms();
        let suffix: u16 = rand::random();
        Self {
            id: format!("{}-{}-{:04x}", origin, created_at_ms, suffix),
            origin: origin.to_string(),
            lat,
            lng,
            hop: 0,
            ttl,
            status: PacketStatus::Created,
            created_at_ms,
            last_peer: None,
            delivered_at_ms: None,
        }
    }

    /// Copy of this packet with a different status.
    pub fn with_status(&self, status: PacketStatus) -> Self {
        let mut copy = self.clone();
        copy.status = status;
        copy
    }

    /// Check whether the hop budget is exhausted.
    pub fn is_expired(&self) -> bool {
        self.hop >= self.ttl
    }
}

impl fmt::Display for MeshPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] hop {}/{} from {}",
            self.id, self.status, self.hop, self.ttl, self.origin
        )
    }
}

/// Flat payload carried over the radios.
///
/// Only routing-relevant fields travel on the wire; lifecycle status and
/// timestamps are device-local bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePayload {
    pub id: String,
    pub origin: String,
    pub lat: f64,
    pub lng: f64,
    pub hop: u8,
    pub ttl: u8,
}

impl WirePayload {
    /// Maximum encoded size the radios will accept.
    pub const MAX_WIRE_BYTES: usize = 256;

    /// Build the wire form of a packet.
    pub fn from_packet(packet: &MeshPacket) -> Self {
        Self {
            id: packet.id.clone(),
            origin: packet.origin.clone(),
            lat: packet.lat,
            lng: packet.lng,
            hop: packet.hop,
            ttl: packet.ttl,
        }
    }

    /// Encode to bytes, or `None` if the payload exceeds the radio MTU.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let bytes = serde_json::to_vec(self).ok()?;
        if bytes.len() > Self::MAX_WIRE_BYTES {
            return None;
        }
        Some(bytes)
    }

    /// Decode from received bytes.
    ///
    /// Returns `None` for malformed input: not every nearby advertisement
    /// carries mesh data, so garbage is silently ignored by callers.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > Self::MAX_WIRE_BYTES {
            return None;
        }
        let payload: WirePayload = serde_json::from_slice(bytes).ok()?;
        if payload.id.is_empty() || payload.ttl == 0 {
            return None;
        }
        Some(payload)
    }

    /// Reconstruct a device-local packet from the wire form.
    ///
    /// Status starts at `Forwarding`; the relay engine decides the real
    /// outcome (duplicate, expired, or onward relay).
    pub fn into_packet(self) -> MeshPacket {
        MeshPacket {
            id: self.id,
            origin: self.origin,
            lat: self.lat,
            lng: self.lng,
            hop: self.hop,
            ttl: self.ttl,
            status: PacketStatus::Forwarding,
            created_at_ms: now_ms(),
            last_peer: None,
            delivered_at_ms: None,
        }
    }
}

/// Immutable event record published on the relay event stream.
///
/// Pairs a packet snapshot with the status it just reached; never mutated
/// after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketState {
    pub packet: MeshPacket,
    pub status: PacketStatus,
    pub timestamp_ms: u64,
    pub message: String,
}

impl PacketState {
    /// Snapshot a packet at its current status.
    pub fn of(packet: &MeshPacket, message: impl Into<String>) -> Self {
        Self {
            packet: packet.clone(),
            status: packet.status,
            timestamp_ms: now_ms(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_packet() {
        let packet = MeshPacket::new("rider-1", 12.97, 77.59, 5);
        assert_eq!(packet.hop, 0);
        assert_eq!(packet.ttl, 5);
        assert_eq!(packet.status, PacketStatus::Created);
        assert!(packet.id.starts_with("rider-1-"));
        assert!(packet.last_peer.is_none());
        assert!(packet.delivered_at_ms.is_none());
    }

    #[test]
    fn test_packet_ids_unique_within_same_instant() {
        let a = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        let b = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_origin_namespaces_ids() {
        let a = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        let b = MeshPacket::new("rider-2", 0.0, 0.0, 3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PacketStatus::Delivered.is_terminal());
        assert!(PacketStatus::Expired.is_terminal());
        assert!(PacketStatus::DuplicateDropped.is_terminal());
        assert!(PacketStatus::Failed.is_terminal());
        assert!(!PacketStatus::Created.is_terminal());
        assert!(!PacketStatus::Forwarding.is_terminal());
        assert!(!PacketStatus::Pending.is_terminal());
    }

    #[test]
    fn test_wire_roundtrip() {
        let packet = MeshPacket::new("rider-1", 12.97, 77.59, 5);
        let bytes = WirePayload::from_packet(&packet).to_bytes().unwrap();
        let decoded = WirePayload::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.id, packet.id);
        assert_eq!(decoded.hop, 0);
        assert_eq!(decoded.ttl, 5);

        let rebuilt = decoded.into_packet();
        assert_eq!(rebuilt.status, PacketStatus::Forwarding);
        assert_eq!(rebuilt.origin, "rider-1");
    }

    #[test]
    fn test_malformed_payload_ignored() {
        assert!(WirePayload::from_bytes(b"not json at all").is_none());
        assert!(WirePayload::from_bytes(b"{\"foo\": 1}").is_none());
        // Structurally valid but semantically empty
        let empty = br#"{"id":"","origin":"x","lat":0,"lng":0,"hop":0,"ttl":3}"#;
        assert!(WirePayload::from_bytes(empty).is_none());
        let zero_ttl = br#"{"id":"a","origin":"x","lat":0,"lng":0,"hop":0,"ttl":0}"#;
        assert!(WirePayload::from_bytes(zero_ttl).is_none());
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let mut packet = MeshPacket::new("rider-1", 0.0, 0.0, 3);
        packet.origin = "x".repeat(400);
        assert!(WirePayload::from_packet(&packet).to_bytes().is_none());
    }

    #[test]
    fn test_packet_state_snapshot() {
        let packet = MeshPacket::new("rider-1", 1.0, 2.0, 3);
        let state = PacketState::of(&packet, "originated");
        assert_eq!(state.status, PacketStatus::Created);
        assert_eq!(state.packet.id, packet.id);
        assert_eq!(state.message, "originated");
    }
}
