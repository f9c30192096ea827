//! Per-peer FIFO packet processing, validation, relay, and fragment
//! reassembly for the ember mesh.
//!
//! The processor guarantees exactly one ordering property: packets from the
//! same originating peer are handled strictly in arrival order, one at a
//! time. Distinct peers process fully concurrently. That property is what
//! keeps a peer's handshake messages from being applied out of order, and it
//! also gives each Noise session exclusive ownership of its replay window.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fragment;
pub mod peers;
pub mod processor;
pub mod security;

pub use fragment::{FragmentManager, FRAGMENT_THRESHOLD, MAX_FRAGMENT_SIZE};
pub use peers::{PeerInfo, PeerManager, STALE_PEER_TIMEOUT};
pub use processor::{PacketProcessor, ProcessorEvent, PEER_QUEUE_DEPTH};
pub use security::{DropReason, SecurityManager, MAX_CLOCK_SKEW_MS};
