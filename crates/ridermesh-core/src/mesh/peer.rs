//! Peer discovery bookkeeping
//!
//! Tracks adjacent devices seen by a transport adapter. Peer tables are
//! adapter-local: they feed relay-path selection and peer-count reporting,
//! never dedup decisions. Stale peers are pruned after a fixed quiet
//! window; pruning never affects already-recorded packets.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A discovered adjacent device.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Device or session identifier (self-asserted, not authenticated)
    pub id: String,
    /// Advertised display name
    pub name: String,
    /// Received signal strength, dBm
    pub rssi: f32,
    /// Time of last advertisement or payload from this peer
    last_seen: Instant,
}

impl Peer {
    pub fn new(id: &str, name: &str, rssi: f32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rssi,
            last_seen: Instant::now(),
        }
    }

    /// Fold in a new sighting using an exponential moving average on
    /// signal strength.
    pub fn update(&mut self, rssi: f32) {
        const ALPHA: f32 = 0.3;
        self.rssi = ALPHA * rssi + (1.0 - ALPHA) * self.rssi;
        self.last_seen = Instant::now();
    }

    pub fn time_since_seen(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn is_stale(&self, window: Duration) -> bool {
        self.last_seen.elapsed() > window
    }
}

/// Table of currently known peers for one transport adapter.
#[derive(Debug)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
    staleness: Duration,
    max_entries: usize,
}

impl PeerTable {
    pub fn new(staleness: Duration, max_entries: usize) -> Self {
        Self {
            peers: HashMap::new(),
            staleness,
            max_entries,
        }
    }

    /// Add or refresh a peer sighting.
    pub fn update(&mut self, id: &str, name: &str, rssi: f32) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.update(rssi);
        } else {
            if self.peers.len() >= self.max_entries {
                self.evict_oldest();
            }
            self.peers.insert(id.to_string(), Peer::new(id, name, rssi));
        }
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Known-good peers, with stale entries filtered out.
    pub fn active(&self) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|p| !p.is_stale(self.staleness))
            .cloned()
            .collect()
    }

    /// Drop peers not heard from within the staleness window.
    pub fn prune_stale(&mut self) -> usize {
        let staleness = self.staleness;
        let before = self.peers.len();
        self.peers.retain(|_, p| !p.is_stale(staleness));
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .peers
            .iter()
            .max_by_key(|(_, p)| p.time_since_seen())
            .map(|(id, _)| id.clone())
        {
            self.peers.remove(&oldest);
        }
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_update_moves_rssi() {
        let mut peer = Peer::new("peer-A", "Asha", -80.0);
        peer.update(-60.0);
        assert!(peer.rssi > -80.0);
        assert!(peer.rssi < -60.0);
    }

    #[test]
    fn test_stale_peers_filtered() {
        let mut table = PeerTable::new(Duration::from_millis(0), 64);
        table.update("peer-A", "Asha", -70.0);

        std::thread::sleep(Duration::from_millis(2));
        assert!(table.active().is_empty());
        assert_eq!(table.prune_stale(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_eviction() {
        let mut table = PeerTable::new(Duration::from_secs(60), 2);
        table.update("peer-A", "", -70.0);
        std::thread::sleep(Duration::from_millis(2));
        table.update("peer-B", "", -70.0);
        table.update("peer-C", "", -70.0);

        assert_eq!(table.len(), 2);
        assert!(table.get("peer-C").is_some());
        assert!(table.get("peer-A").is_none());
    }
}
