//! Mesh orchestration for the ember mesh.
//!
//! [`MeshService`] composes the scanning/advertising/connection collaborators
//! (behind the [`Transport`] trait), feeds inbound bytes through the packet
//! processor, and exposes the send/broadcast surface to the application. It
//! owns the identity-announcement cadence, Noise session lifecycle, and the
//! ordered teardown that stops workers and timers before key material is
//! destroyed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod service;
pub mod sessions;
pub mod transport;

pub use service::{MeshEvent, MeshService, ServiceConfig, MESH_SERVICE_ID};
pub use sessions::SessionRegistry;
pub use transport::{memory_transport_pair, MemoryTransport, Transport, TransportError, TransportEvent};
