//! Ad-hoc emergency mesh relay
//!
//! Flood-with-TTL relay for rider SOS alerts over short-range radios,
//! with no routing tables and no path computation. The layering keeps
//! the decision core transport-agnostic:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     RelayEngine                           │
//! │   originate  /  ingest  /  check_internet_and_try_deliver │
//! └──────────────────────────────────────────────────────────┘
//!        │ consults                         │ broadcasts via
//!        ▼                                  ▼
//! ┌───────────────────┐      ┌─────────────────────────────────┐
//! │  PacketRegistry   │      │        Transport trait           │
//! │  seen-ids + store │      │  LinkTransport / SimulatedRelay  │
//! └───────────────────┘      └─────────────────────────────────┘
//! ```
//!
//! Loop prevention is dedup on the packet id; propagation is bounded by
//! the hop/TTL budget; and any relaying device that regains internet
//! connectivity delivers on behalf of the whole alert.

pub mod packet;
pub mod peer;
pub mod registry;
pub mod relay;
pub mod simulation;
pub mod transport;

pub use packet::{MeshPacket, PacketState, PacketStatus, WirePayload};
pub use peer::{Peer, PeerTable};
pub use registry::{PacketRegistry, RegistryStats};
pub use relay::{RelayConfig, RelayEngine, RelayError};
pub use simulation::{MeshSimulator, SimConfig, SimStats};
pub use transport::{LinkBus, LinkTransport, SimulatedRelay, Transport, TransportKind};
