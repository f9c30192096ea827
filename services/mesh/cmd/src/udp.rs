//! UDP-broadcast reference transport.
//!
//! The protocol core only needs a callback-driven byte pipe; this binding
//! provides one over a LAN using UDP broadcast. Scanning, advertising, and
//! connection management are no-ops because datagrams need no link setup;
//! every daemon on the subnet sharing the port hears every broadcast.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mesh_service::{Transport, TransportError, TransportEvent};

/// Largest datagram we accept; generously above any padded packet.
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    port: u16,
}

impl UdpTransport {
    /// Bind the shared mesh port and start the receive loop.
    pub async fn bind(
        port: u16,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|err| TransportError::Io(err.to_string()))?;
        let socket = Arc::new(socket);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = Arc::clone(&socket);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match reader.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let event = TransportEvent::DataReceived {
                            address: from.to_string(),
                            data: buf[..len].to_vec(),
                        };
                        if events_tx.send(event).is_err() {
                            break; // service went away
                        }
                    }
                    Err(err) => {
                        warn!("UDP receive failed: {}", err);
                        break;
                    }
                }
            }
        });

        debug!("UDP transport bound on port {}", port);
        Ok((Self { socket, port }, events_rx))
    }

    async fn send_to(&self, address: &str, data: &[u8]) -> Result<(), TransportError> {
        let target: SocketAddr = address
            .parse()
            .map_err(|_| TransportError::NotConnected(address.to_string()))?;
        self.socket
            .send_to(data, target)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn scan(&self, _low_latency: bool) -> Result<(), TransportError> {
        Ok(()) // broadcast medium, nothing to scan
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn advertise(&self, service_id: &str, device_name: &str) -> Result<(), TransportError> {
        debug!("Advertising {} as {}", service_id, device_name);
        Ok(())
    }

    async fn connect(&self, _address: &str) -> Result<(), TransportError> {
        Ok(()) // datagrams are connectionless
    }

    async fn disconnect(&self, _address: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn write(&self, address: &str, data: &[u8]) -> Result<(), TransportError> {
        self.send_to(address, data).await
    }

    async fn notify(&self, address: &str, data: &[u8]) -> Result<(), TransportError> {
        self.send_to(address, data).await
    }

    async fn broadcast(&self, data: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(data, (Ipv4Addr::BROADCAST, self.port))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(())
    }
}
