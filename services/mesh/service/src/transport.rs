//! The radio transport collaborator contract.
//!
//! The protocol core never assumes a specific radio technology: any
//! callback-driven byte-stream transport satisfies this trait. Discovery and
//! data callbacks arrive as [`TransportEvent`]s over an mpsc channel.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport driver errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// No open link to the given address
    #[error("no link to {0}")]
    NotConnected(String),

    /// Underlying driver failure
    #[error("transport i/o: {0}")]
    Io(String),
}

/// Events emitted by a transport driver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A nearby device was discovered during a scan
    DeviceDiscovered {
        /// Link-layer address
        address: String,
        /// Advertised name, if any
        name: Option<String>,
        /// Signal strength indicator
        rssi: i32,
    },
    /// A connection finished setup and can carry data
    ConnectionReady {
        /// Link-layer address
        address: String,
    },
    /// Bytes arrived from a connected device
    DataReceived {
        /// Link-layer address of the sender
        address: String,
        /// Raw received bytes
        data: Vec<u8>,
    },
    /// A connection dropped
    Disconnected {
        /// Link-layer address
        address: String,
    },
}

/// A callback-driven byte-stream radio transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start scanning for nearby devices.
    async fn scan(&self, low_latency: bool) -> Result<(), TransportError>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Start advertising this device under `service_id`.
    async fn advertise(&self, service_id: &str, device_name: &str) -> Result<(), TransportError>;

    /// Open a connection to `address`.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Tear down the connection to `address`.
    async fn disconnect(&self, address: &str) -> Result<(), TransportError>;

    /// Write bytes to one connected device.
    async fn write(&self, address: &str, data: &[u8]) -> Result<(), TransportError>;

    /// Push a notification payload to one connected device.
    async fn notify(&self, address: &str, data: &[u8]) -> Result<(), TransportError>;

    /// Write bytes to every open link.
    async fn broadcast(&self, data: &[u8]) -> Result<(), TransportError>;
}

/// In-memory transport for tests and local development: two endpoints wired
/// back to back, every write surfacing as `DataReceived` on the other side.
pub struct MemoryTransport {
    address: String,
    peer: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MemoryTransport {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            peer: Mutex::new(None),
        }
    }

    fn deliver(&self, data: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer.lock().expect("peer link lock");
        let Some(ref sink) = *peer else {
            return Err(TransportError::NotConnected("peer".to_string()));
        };
        sink.send(TransportEvent::DataReceived {
            address: self.address.clone(),
            data: data.to_vec(),
        })
        .map_err(|_| TransportError::NotConnected("peer".to_string()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn scan(&self, _low_latency: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn advertise(&self, _service_id: &str, _device_name: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&self, _address: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self, _address: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn write(&self, _address: &str, data: &[u8]) -> Result<(), TransportError> {
        self.deliver(data)
    }

    async fn notify(&self, _address: &str, data: &[u8]) -> Result<(), TransportError> {
        self.deliver(data)
    }

    async fn broadcast(&self, data: &[u8]) -> Result<(), TransportError> {
        self.deliver(data)
    }
}

/// Build two linked in-memory transports plus their event receivers.
///
/// Each receiver starts with a `ConnectionReady` for the opposite endpoint,
/// mirroring what a radio driver reports once a link is usable.
pub fn memory_transport_pair() -> (
    (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>),
    (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>),
) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let a = MemoryTransport::new("mem-a");
    let b = MemoryTransport::new("mem-b");
    *a.peer.lock().expect("peer link lock") = Some(tx_b.clone());
    *b.peer.lock().expect("peer link lock") = Some(tx_a.clone());

    let _ = tx_a.send(TransportEvent::ConnectionReady {
        address: "mem-b".to_string(),
    });
    let _ = tx_b.send(TransportEvent::ConnectionReady {
        address: "mem-a".to_string(),
    });

    ((a, rx_a), (b, rx_b))
}
