//! The per-peer packet processing pipeline.
//!
//! For every packet read off the transport the processor decides whether to
//! process it locally, relay it, or drop it. One bounded FIFO queue and one
//! worker task exist per originating peer, created lazily on first contact:
//! at most one handler runs per peer at any moment, so handshake state
//! transitions for a given peer are never applied out of order, while
//! distinct peers process fully concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use mesh_wire::Packet;

use crate::peers::PeerManager;
use crate::security::SecurityManager;

/// Per-peer queue depth; packets beyond it are dropped (best-effort model).
pub const PEER_QUEUE_DEPTH: usize = 256;

/// Output of the pipeline, consumed by the mesh service.
#[derive(Debug)]
pub enum ProcessorEvent {
    /// Rebroadcast this packet; its TTL is already decremented.
    Relay(Packet),
    /// Hand this validated packet to the message handler.
    Dispatch {
        /// The validated packet
        packet: Packet,
        /// Originating peer ID
        peer_id: String,
    },
}

/// Per-peer serialized packet processor.
pub struct PacketProcessor {
    security: Arc<SecurityManager>,
    peers: Arc<PeerManager>,
    events: mpsc::UnboundedSender<ProcessorEvent>,
    queues: Mutex<HashMap<String, mpsc::Sender<Packet>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl PacketProcessor {
    /// Create a processor; the returned receiver yields relay and dispatch
    /// events in per-peer FIFO order.
    pub fn new(
        security: Arc<SecurityManager>,
        peers: Arc<PeerManager>,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                security,
                peers,
                events,
                queues: Mutex::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            },
            events_rx,
        )
    }

    /// Enqueue a packet from `peer_id`.
    ///
    /// Queues are created lazily per peer. A full queue drops the packet
    /// rather than blocking the transport; delivery is best-effort.
    pub fn process_packet(&self, packet: Packet, peer_id: &str) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let sender = {
            let mut queues = self.queues.lock().expect("queue lock");
            queues
                .entry(peer_id.to_string())
                .or_insert_with(|| self.spawn_worker(peer_id))
                .clone()
        };

        match sender.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Packet queue full for {}, dropping packet", peer_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Packet queue for {} already closed", peer_id);
            }
        }
    }

    fn spawn_worker(&self, peer_id: &str) -> mpsc::Sender<Packet> {
        let (sender, mut receiver) = mpsc::channel::<Packet>(PEER_QUEUE_DEPTH);
        let peer_id = peer_id.to_string();
        let security = Arc::clone(&self.security);
        let peers = Arc::clone(&self.peers);
        let events = self.events.clone();

        debug!("Starting packet worker for {}", peer_id);
        let handle = tokio::spawn(async move {
            while let Some(packet) = receiver.recv().await {
                handle_packet(packet, &peer_id, &security, &peers, &events);
            }
            debug!("Packet worker for {} stopped", peer_id);
        });
        self.workers.lock().expect("worker lock").push(handle);

        sender
    }

    /// Close all per-peer queues and cancel their workers. In-flight packets
    /// are dropped, not drained.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.queues.lock().expect("queue lock").clear();
        let mut workers = self.workers.lock().expect("worker lock");
        for worker in workers.drain(..) {
            worker.abort();
        }
        debug!("Packet processor shut down");
    }
}

fn handle_packet(
    packet: Packet,
    peer_id: &str,
    security: &SecurityManager,
    peers: &PeerManager,
    events: &mpsc::UnboundedSender<ProcessorEvent>,
) {
    let signing_key = peers.signing_key(peer_id);

    if let Err(reason) = security.validate_packet(
        &packet,
        peer_id,
        signing_key.as_deref(),
        mesh_wire::packet::now_millis(),
    ) {
        trace!("Dropping packet from {}: {:?}", peer_id, reason);
        return;
    }

    peers.touch(peer_id);
    if packet.signature.is_some() && signing_key.is_some() {
        // A valid signature against the announced key proves the nickname
        peers.mark_verified(peer_id);
    }

    if packet.ttl > 0 {
        let mut relayed = packet.clone();
        relayed.ttl -= 1;
        let _ = events.send(ProcessorEvent::Relay(relayed));
    }

    let _ = events.send(ProcessorEvent::Dispatch {
        packet,
        peer_id: peer_id.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::MessageType;
    use std::time::Duration;
    use tokio::time::timeout;

    fn processor() -> (PacketProcessor, mpsc::UnboundedReceiver<ProcessorEvent>) {
        let security = Arc::new(SecurityManager::new("aaaa"));
        let peers = Arc::new(PeerManager::new());
        PacketProcessor::new(security, peers)
    }

    fn announce(timestamp_offset: u64, ttl: u8) -> Packet {
        let mut packet = Packet::new(MessageType::Announce, ttl, "bbbb", Vec::new());
        packet.timestamp += timestamp_offset;
        packet
    }

    async fn next_event(
        events: &mut mpsc::UnboundedReceiver<ProcessorEvent>,
    ) -> ProcessorEvent {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_ttl_positive_relayed_with_decrement() {
        let (processor, mut events) = processor();
        processor.process_packet(announce(0, 3), "bbbb");

        match next_event(&mut events).await {
            ProcessorEvent::Relay(relayed) => assert_eq!(relayed.ttl, 2),
            other => panic!("expected relay, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut events).await,
            ProcessorEvent::Dispatch { .. }
        ));
        processor.shutdown();
    }

    #[tokio::test]
    async fn test_ttl_zero_never_relayed() {
        let (processor, mut events) = processor();
        processor.process_packet(announce(0, 0), "bbbb");

        match next_event(&mut events).await {
            ProcessorEvent::Dispatch { packet, .. } => assert_eq!(packet.ttl, 0),
            other => panic!("expected dispatch only, got {other:?}"),
        }
        processor.shutdown();
    }

    #[tokio::test]
    async fn test_mixed_ttls_processed_in_arrival_order() {
        let (processor, mut events) = processor();

        // Same peer, arrival order: ttl 0, ttl 2, ttl 0, ttl 1
        for (offset, ttl) in [(0u64, 0u8), (1, 2), (2, 0), (3, 1)] {
            processor.process_packet(announce(offset, ttl), "bbbb");
        }

        let mut dispatched_ttls = Vec::new();
        let mut relayed_ttls = Vec::new();
        for _ in 0..6 {
            match next_event(&mut events).await {
                ProcessorEvent::Dispatch { packet, .. } => dispatched_ttls.push(packet.ttl),
                ProcessorEvent::Relay(packet) => relayed_ttls.push(packet.ttl),
            }
        }

        // Arrival order preserved for the same peer
        assert_eq!(dispatched_ttls, vec![0, 2, 0, 1]);
        // Only the TTL-positive packets triggered a relay, each decremented
        assert_eq!(relayed_ttls, vec![1, 0]);
        processor.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_relayed_at_most_once() {
        let (processor, mut events) = processor();
        let packet = announce(0, 3);

        processor.process_packet(packet.clone(), "bbbb");
        processor.process_packet(packet, "bbbb");

        assert!(matches!(
            next_event(&mut events).await,
            ProcessorEvent::Relay(_)
        ));
        assert!(matches!(
            next_event(&mut events).await,
            ProcessorEvent::Dispatch { .. }
        ));
        // The duplicate produced nothing
        assert!(timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err());
        processor.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_sender_non_announce_dropped() {
        let (processor, mut events) = processor();
        let packet = Packet::new(MessageType::Message, 3, "bbbb", b"hi".to_vec());
        processor.process_packet(packet, "bbbb");

        assert!(timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err());
        processor.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_drops_in_flight_quietly() {
        let (processor, _events) = processor();
        processor.process_packet(announce(0, 3), "bbbb");
        processor.shutdown();
        // New packets after shutdown are dropped without panicking
        processor.process_packet(announce(1, 3), "bbbb");
    }
}
