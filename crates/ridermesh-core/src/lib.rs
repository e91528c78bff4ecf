//! # RiderMesh Core
//!
//! Rider-safety core combining an ad-hoc emergency mesh relay protocol
//! with a continuous multi-sensor hazard classifier. Both run with no
//! reliable network, make irreversible decisions (broadcast an SOS,
//! drop a duplicate, expire a packet) under partial information, and
//! never silently lose a safety-critical event.
//!
//! ## Data flow
//!
//! ```text
//! sensors ─► HazardClassifier ─► HazardEvent ─► SosBridge ─► RelayEngine
//!                                                               │
//!                                   PacketRegistry ◄── record ──┤
//!                                   Transport      ◄── broadcast┘
//!                                        │
//!                                     peers ─► ingest ─► relay | drop | expire
//! ```
//!
//! The library is synchronous and tick-driven: callers own the clock
//! and drive discovery, retries, and the SOS countdown through
//! `tick(Duration)` calls, which keeps every decision deterministic
//! under test and replay.
//!
//! ## Example
//!
//! ```rust
//! use ridermesh_core::external::FixedProbe;
//! use ridermesh_core::mesh::{RelayConfig, RelayEngine, SimulatedRelay, Transport};
//!
//! let mut fallback = SimulatedRelay::new();
//! fallback.start_discovery();
//! let mut relay = RelayEngine::new(
//!     vec![Box::new(fallback)],
//!     Box::new(FixedProbe(false)),
//!     RelayConfig::default(),
//! );
//! let packet = relay.originate("rider-1", 12.97, 77.59, 5).unwrap();
//! assert_eq!(packet.hop, 1);
//! ```

pub mod bridge;
pub mod events;
pub mod external;
pub mod mesh;
pub mod sensors;

pub use bridge::{BridgeConfig, BridgeEvent, BridgePhase, SosBridge};
pub use events::EventBus;
pub use external::{ConnectivityProbe, FixedLocation, FixedProbe, LocationFix, LocationProvider};
pub use mesh::{
    MeshPacket, MeshSimulator, PacketRegistry, PacketState, PacketStatus, RelayConfig,
    RelayEngine, RelayError, SimConfig, Transport, TransportKind,
};
pub use sensors::{
    AccelSample, ClassifierConfig, GpsFix, HazardClassifier, HazardEvent, HazardKind,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bridge::{BridgeConfig, SosBridge};
    pub use crate::external::{ConnectivityProbe, LocationProvider};
    pub use crate::mesh::{MeshPacket, PacketStatus, RelayConfig, RelayEngine, Transport};
    pub use crate::sensors::{AccelSample, GpsFix, HazardClassifier, HazardEvent, HazardKind};
}
