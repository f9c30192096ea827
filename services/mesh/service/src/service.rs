//! The mesh service: orchestration over transport, sessions, and the packet
//! pipeline.
//!
//! Inbound: transport bytes decode into packets and enter the per-peer
//! processor, which emits relay and dispatch events back here. Outbound:
//! application sends resolve a Noise session where needed, sign, encode
//! (compression happens inside the codec), fragment when oversized, and hand
//! bytes to the transport. The service also owns the periodic identity
//! announcement and the maintenance sweeps that keep every cache bounded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use mesh_identity::Identity;
use mesh_noise::SessionState;
use mesh_relay::{
    FragmentManager, PacketProcessor, PeerInfo, PeerManager, ProcessorEvent, SecurityManager,
};
use mesh_wire::packet::now_millis;
use mesh_wire::{
    IdentityAnnouncement, MessageType, NoisePayload, NoisePayloadType, Packet, PrivateMessage,
    WireError, BROADCAST_RECIPIENT, PEER_ID_SIZE,
};

use crate::sessions::SessionRegistry;
use crate::transport::{Transport, TransportError, TransportEvent};

/// Service UUID advertised over the radio.
pub const MESH_SERVICE_ID: &str = "E7C94A31-5D20-4F8B-A1C6-9D2E83B07F44";

/// Encrypted payloads waiting for a session, per peer.
const MAX_PENDING_ENCRYPTED: usize = 32;

/// Fragment payload layout: id (8) + last-flag (1) + chunk.
const FRAGMENT_ID_SIZE: usize = 8;

/// Tunables for a running mesh service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Nickname carried in identity announcements
    pub nickname: String,
    /// Periodic re-announce cadence so late joiners learn us
    pub announce_interval: Duration,
    /// Cadence of cache sweeps and rekey checks
    pub maintenance_interval: Duration,
    /// Hop budget for locally originated packets
    pub message_ttl: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            nickname: "anonymous".to_string(),
            announce_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(30),
            message_ttl: 3,
        }
    }
}

/// Events surfaced to the application layer.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A peer announced its identity
    PeerAnnounced {
        /// Announcing peer
        peer_id: String,
        /// Claimed nickname
        nickname: String,
    },
    /// The set of known peers changed
    PeerListUpdated {
        /// All currently known peer IDs
        peers: Vec<String>,
    },
    /// A peer left the mesh
    PeerLeft {
        /// Departing peer
        peer_id: String,
    },
    /// A plaintext (broadcast or directed) message arrived
    MessageReceived {
        /// Sending peer
        peer_id: String,
        /// Message text
        content: String,
        /// Whether it addressed every peer
        is_broadcast: bool,
    },
    /// A Noise-encrypted private message arrived
    PrivateMessageReceived {
        /// Sending peer
        peer_id: String,
        /// Sender-assigned message ID
        message_id: String,
        /// Message text
        content: String,
    },
    /// The peer read one of our messages
    ReadReceipt {
        /// Reading peer
        peer_id: String,
        /// Message that was read
        message_id: String,
    },
    /// The peer confirmed delivery of one of our messages
    DeliveryConfirmed {
        /// Confirming peer
        peer_id: String,
        /// Delivered message
        message_id: String,
    },
    /// A Noise session reached `Established`
    SessionEstablished {
        /// Peer on the other end
        peer_id: String,
    },
    /// A file transfer payload arrived
    FileReceived {
        /// Sending peer
        peer_id: String,
        /// Raw file packet bytes
        data: Vec<u8>,
        /// Whether it addressed every peer
        is_broadcast: bool,
    },
    /// A peer requested a sync
    SyncRequested {
        /// Requesting peer
        peer_id: String,
    },
}

/// Orchestrates the mesh protocol stack over one transport.
pub struct MeshService {
    identity: Arc<Identity>,
    my_peer_id: String,
    my_peer_id_bytes: [u8; PEER_ID_SIZE],
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionRegistry>,
    peers: Arc<PeerManager>,
    security: Arc<SecurityManager>,
    processor: Arc<PacketProcessor>,
    fragments: Arc<FragmentManager>,
    events: mpsc::UnboundedSender<MeshEvent>,
    processor_events: Mutex<Option<mpsc::UnboundedReceiver<ProcessorEvent>>>,
    device_to_peer: Mutex<HashMap<String, String>>,
    peer_to_device: Mutex<HashMap<String, String>>,
    pending_encrypted: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MeshService {
    /// Build a service around `identity` and `transport`.
    ///
    /// Returns the service plus the application event stream.
    pub fn new(
        identity: Identity,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MeshEvent>) {
        let identity = Arc::new(identity);
        let my_peer_id = identity.fingerprint();
        let my_peer_id_bytes = mesh_wire::peer_id_to_bytes(&my_peer_id);

        let peers = Arc::new(PeerManager::new());
        let security = Arc::new(SecurityManager::new(&my_peer_id));
        let (processor, processor_events) =
            PacketProcessor::new(Arc::clone(&security), Arc::clone(&peers));
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&identity)));
        let (events, events_rx) = mpsc::unbounded_channel();

        // Register ourselves so our own nickname resolves locally
        peers.add_or_update_peer(
            &my_peer_id,
            &config.nickname,
            true,
            true,
            Some(identity.noise_public_key().to_vec()),
            Some(identity.signing_public_key().to_vec()),
            true,
        );

        info!("Mesh service for peer {} ({})", my_peer_id, config.nickname);
        let service = Arc::new(Self {
            identity,
            my_peer_id,
            my_peer_id_bytes,
            config,
            transport,
            sessions,
            peers,
            security,
            processor: Arc::new(processor),
            fragments: Arc::new(FragmentManager::new()),
            events,
            processor_events: Mutex::new(Some(processor_events)),
            device_to_peer: Mutex::new(HashMap::new()),
            peer_to_device: Mutex::new(HashMap::new()),
            pending_encrypted: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        });
        (service, events_rx)
    }

    /// Our peer ID (the identity fingerprint).
    pub fn peer_id(&self) -> &str {
        &self.my_peer_id
    }

    /// Snapshot of known peers.
    pub fn all_peers(&self) -> Vec<PeerInfo> {
        self.peers.all_peers()
    }

    /// Whether an established Noise session exists with `peer_id`.
    pub fn has_established_session(&self, peer_id: &str) -> bool {
        self.sessions.has_established(peer_id)
    }

    /// Noise session state for `peer_id`, if any session exists.
    pub fn session_state(&self, peer_id: &str) -> Option<SessionState> {
        self.sessions.state(peer_id)
    }

    /// Start advertising, scanning, and all background loops, then send the
    /// first identity announcement.
    pub async fn start(
        self: &Arc<Self>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<(), TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let device_name = format!("ember-{}", &self.my_peer_id[..8.min(self.my_peer_id.len())]);
        self.transport.advertise(MESH_SERVICE_ID, &device_name).await?;
        self.transport.scan(true).await?;

        let Some(processor_events) = self
            .processor_events
            .lock()
            .expect("processor events lock")
            .take()
        else {
            warn!("Mesh service cannot be restarted after stop");
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let mut tasks = self.tasks.lock().expect("task lock");
        tasks.push(self.spawn_transport_loop(transport_events));
        tasks.push(self.spawn_processor_loop(processor_events));
        tasks.push(self.spawn_announce_loop());
        tasks.push(self.spawn_maintenance_loop());
        drop(tasks);

        self.send_announce().await;
        info!("Mesh service started as {}", self.my_peer_id);
        Ok(())
    }

    /// Stop everything.
    ///
    /// Workers and timers are cancelled before sessions are destroyed so no
    /// task can touch zeroized key material.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().expect("task lock");
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);
        self.processor.shutdown();

        let _ = self.transport.stop_scan().await;

        self.sessions.clear_all();
        self.security.clear_all();
        self.fragments.clear();
        self.pending_encrypted.lock().expect("pending lock").clear();
        info!("Mesh service stopped");
    }

    // ------------------------------------------------------------------
    // Outbound surface
    // ------------------------------------------------------------------

    /// Broadcast a plaintext message to every peer.
    pub async fn send_message(&self, content: &str) {
        let mut packet = Packet::new(
            MessageType::Message,
            self.config.message_ttl,
            &self.my_peer_id,
            content.as_bytes().to_vec(),
        );
        packet.recipient_id = Some(BROADCAST_RECIPIENT);
        self.sign_and_send(packet, None).await;
    }

    /// Send an encrypted private message; returns its message ID.
    ///
    /// Requires an established session: call
    /// [`MeshService::initiate_handshake`] first and wait for
    /// [`MeshEvent::SessionEstablished`].
    pub async fn send_private_message(&self, recipient: &str, content: &str) -> Option<String> {
        if !self.sessions.has_established(recipient) {
            warn!("No established session with {}, cannot send", recipient);
            return None;
        }

        let message_id = Uuid::new_v4().to_string().to_uppercase();
        let message = PrivateMessage {
            message_id: message_id.clone(),
            content: content.to_string(),
        };
        let tlv = match message.encode() {
            Ok(tlv) => tlv,
            Err(err) => {
                warn!("Failed to encode private message: {}", err);
                return None;
            }
        };

        let payload = NoisePayload::new(NoisePayloadType::PrivateMessage, tlv).encode();
        let encrypted = self.sessions.encrypt(recipient, &payload)?;

        let packet = Packet::new_directed(
            MessageType::NoiseEncrypted,
            self.config.message_ttl,
            &self.my_peer_id,
            recipient,
            encrypted,
        );
        self.sign_and_send(packet, Some(recipient)).await;
        Some(message_id)
    }

    /// Tell `recipient` that `message_id` was read.
    pub async fn send_read_receipt(&self, recipient: &str, message_id: &str) {
        self.send_noise_payload(recipient, NoisePayloadType::ReadReceipt, message_id.as_bytes())
            .await;
    }

    /// Tell `recipient` that `message_id` was delivered.
    pub async fn send_delivery_confirmation(&self, recipient: &str, message_id: &str) {
        self.send_noise_payload(recipient, NoisePayloadType::Delivered, message_id.as_bytes())
            .await;
    }

    async fn send_noise_payload(
        &self,
        recipient: &str,
        payload_type: NoisePayloadType,
        data: &[u8],
    ) {
        let payload = NoisePayload::new(payload_type, data.to_vec()).encode();
        let Some(encrypted) = self.sessions.encrypt(recipient, &payload) else {
            warn!("No established session with {}, dropping {:?}", recipient, payload_type);
            return;
        };

        let packet = Packet::new_directed(
            MessageType::NoiseEncrypted,
            self.config.message_ttl,
            &self.my_peer_id,
            recipient,
            encrypted,
        );
        self.sign_and_send(packet, Some(recipient)).await;
    }

    /// Announce our identity (nickname plus both public keys) to the mesh.
    pub async fn send_announce(&self) {
        let announcement = IdentityAnnouncement {
            nickname: self.config.nickname.clone(),
            noise_public_key: self.identity.noise_public_key().to_vec(),
            signing_public_key: self.identity.signing_public_key().to_vec(),
        };

        let payload = match announcement.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode announcement: {}", err);
                return;
            }
        };

        let packet = Packet::new(
            MessageType::Announce,
            self.config.message_ttl,
            &self.my_peer_id,
            payload,
        );
        self.sign_and_send(packet, None).await;
    }

    /// Tell the mesh we are leaving.
    pub async fn send_leave(&self) {
        let packet = Packet::new(
            MessageType::Leave,
            self.config.message_ttl,
            &self.my_peer_id,
            Vec::new(),
        );
        self.sign_and_send(packet, None).await;
    }

    /// Start a Noise handshake with `peer_id`.
    ///
    /// Idempotent: nothing is sent when a handshake is already in flight or a
    /// session is established.
    pub async fn initiate_handshake(&self, peer_id: &str) {
        let Some(message) = self.sessions.initiate_handshake(peer_id) else {
            debug!("Session with {} already exists, skipping handshake", peer_id);
            return;
        };

        debug!("Initiating handshake with {}", peer_id);
        self.send_handshake_message(peer_id, message).await;
    }

    async fn send_handshake_message(&self, peer_id: &str, message: Vec<u8>) {
        let packet = Packet::new_directed(
            MessageType::NoiseHandshake,
            self.config.message_ttl,
            &self.my_peer_id,
            peer_id,
            message,
        );
        self.sign_and_send(packet, Some(peer_id)).await;
    }

    async fn sign_and_send(&self, mut packet: Packet, recipient: Option<&str>) {
        match packet.to_signable_bytes() {
            Ok(signable) => packet.signature = Some(self.identity.sign(&signable)),
            Err(err) => {
                warn!("Failed to build signable form: {}", err);
                return;
            }
        }
        self.send_packet(&packet, recipient).await;
    }

    async fn send_packet(&self, packet: &Packet, recipient: Option<&str>) {
        let encoded = match packet.to_wire() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("Failed to encode {:?} packet: {}", packet.packet_type, err);
                return;
            }
        };

        if FragmentManager::needs_fragmentation(encoded.len())
            && packet.packet_type != MessageType::Fragment
        {
            self.send_fragments(&encoded, recipient).await;
            return;
        }

        self.send_bytes(&encoded, recipient).await;
    }

    /// Split an oversized encoded packet into fragment packets.
    async fn send_fragments(&self, encoded: &[u8], recipient: Option<&str>) {
        let id_bytes = Uuid::new_v4().into_bytes();
        let fragment_id = &id_bytes[..FRAGMENT_ID_SIZE];
        let chunks = FragmentManager::split(encoded);
        let last = chunks.len() - 1;
        debug!("Fragmenting {} bytes into {} chunks", encoded.len(), chunks.len());

        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut payload = Vec::with_capacity(FRAGMENT_ID_SIZE + 1 + chunk.len());
            payload.extend_from_slice(fragment_id);
            payload.push(u8::from(index == last));
            payload.extend_from_slice(&chunk);

            let packet = match recipient {
                Some(peer) => Packet::new_directed(
                    MessageType::Fragment,
                    self.config.message_ttl,
                    &self.my_peer_id,
                    peer,
                    payload,
                ),
                None => Packet::new(
                    MessageType::Fragment,
                    self.config.message_ttl,
                    &self.my_peer_id,
                    payload,
                ),
            };
            Box::pin(self.sign_and_send(packet, recipient)).await;
        }
    }

    async fn send_bytes(&self, bytes: &[u8], recipient: Option<&str>) {
        // Prefer a direct link when we know one; fall back to flooding
        if let Some(peer) = recipient {
            let address = self
                .peer_to_device
                .lock()
                .expect("device map lock")
                .get(peer)
                .cloned();
            if let Some(address) = address {
                match self.transport.write(&address, bytes).await {
                    Ok(()) => return,
                    Err(err) => debug!("Direct write to {} failed: {}", address, err),
                }
            }
        }

        if let Err(err) = self.transport.broadcast(bytes).await {
            warn!("Broadcast failed: {}", err);
        }
    }

    // ------------------------------------------------------------------
    // Inbound pipeline
    // ------------------------------------------------------------------

    fn spawn_transport_loop(
        self: &Arc<Self>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                match event {
                    TransportEvent::DataReceived { address, data } => {
                        service.on_data_received(&address, &data);
                    }
                    TransportEvent::ConnectionReady { address } => {
                        debug!("Connection ready: {}, announcing", address);
                        service.send_announce().await;
                    }
                    TransportEvent::DeviceDiscovered { address, name, rssi } => {
                        trace!("Discovered {} ({:?}) at {} dBm", address, name, rssi);
                        let _ = service.transport.connect(&address).await;
                    }
                    TransportEvent::Disconnected { address } => {
                        service.on_disconnected(&address);
                    }
                }
            }
        })
    }

    /// Decode inbound bytes and feed the per-peer pipeline.
    fn on_data_received(&self, address: &str, data: &[u8]) {
        let packet = match mesh_wire::decode(data) {
            Ok(packet) => packet,
            Err(WireError::UnknownType(value)) => {
                trace!("Dropping packet with unknown type 0x{:02x}", value);
                return;
            }
            Err(err) => {
                debug!(
                    "Failed to decode {} bytes from {}: {}",
                    data.len(),
                    address,
                    err
                );
                return;
            }
        };

        let peer_id = packet.sender_hex();
        self.record_device_mapping(&peer_id, address);
        self.processor.process_packet(packet, &peer_id);
    }

    fn record_device_mapping(&self, peer_id: &str, address: &str) {
        let mut device_to_peer = self.device_to_peer.lock().expect("device map lock");
        let previous = device_to_peer.insert(address.to_string(), peer_id.to_string());
        if previous.as_deref() != Some(peer_id) {
            trace!("Mapped device {} to peer {}", address, peer_id);
        }
        self.peer_to_device
            .lock()
            .expect("device map lock")
            .insert(peer_id.to_string(), address.to_string());
    }

    fn on_disconnected(&self, address: &str) {
        let peer_id = self
            .device_to_peer
            .lock()
            .expect("device map lock")
            .remove(address);
        let Some(peer_id) = peer_id else { return };

        self.peer_to_device
            .lock()
            .expect("device map lock")
            .remove(&peer_id);
        self.peers.disconnect_peer(&peer_id);
        self.emit_peer_list();
        debug!("Peer {} disconnected ({})", peer_id, address);
    }

    fn spawn_processor_loop(
        self: &Arc<Self>,
        mut processor_events: mpsc::UnboundedReceiver<ProcessorEvent>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = processor_events.recv().await {
                match event {
                    ProcessorEvent::Relay(packet) => service.relay_packet(&packet).await,
                    ProcessorEvent::Dispatch { packet, peer_id } => {
                        service.handle_packet(packet, &peer_id).await;
                    }
                }
            }
        })
    }

    /// Rebroadcast a relayed packet as-is: the origin's signature covers the
    /// TTL-zero form, so the decremented TTL does not invalidate it.
    async fn relay_packet(&self, packet: &Packet) {
        match packet.to_wire() {
            Ok(encoded) => {
                trace!(
                    "Relaying {:?} from {} with ttl {}",
                    packet.packet_type,
                    packet.sender_hex(),
                    packet.ttl
                );
                self.send_bytes(&encoded, None).await;
            }
            Err(err) => debug!("Failed to re-encode relay packet: {}", err),
        }
    }

    fn addressed_to_us(&self, packet: &Packet) -> bool {
        match packet.recipient_id {
            None => true,
            Some(recipient) => {
                recipient == self.my_peer_id_bytes || recipient == BROADCAST_RECIPIENT
            }
        }
    }

    async fn handle_packet(&self, packet: Packet, peer_id: &str) {
        match packet.packet_type {
            MessageType::Announce => self.handle_announce(&packet, peer_id),
            MessageType::Message => self.handle_message(&packet, peer_id),
            MessageType::Leave => self.handle_leave(peer_id),
            MessageType::NoiseHandshake => self.handle_handshake(&packet, peer_id).await,
            MessageType::NoiseEncrypted => self.handle_encrypted(&packet, peer_id).await,
            MessageType::Fragment => self.handle_fragment(&packet, peer_id),
            MessageType::RequestSync => {
                let _ = self.events.send(MeshEvent::SyncRequested {
                    peer_id: peer_id.to_string(),
                });
            }
            MessageType::FileTransfer => {
                if self.addressed_to_us(&packet) {
                    let _ = self.events.send(MeshEvent::FileReceived {
                        peer_id: peer_id.to_string(),
                        data: packet.payload.clone(),
                        is_broadcast: packet.is_broadcast(),
                    });
                }
            }
        }
    }

    fn handle_announce(&self, packet: &Packet, peer_id: &str) {
        let Some(announcement) = IdentityAnnouncement::decode(&packet.payload) else {
            warn!("Failed to decode announcement from {}", peer_id);
            return;
        };

        debug!(
            "Peer {} announced as '{}'",
            peer_id, announcement.nickname
        );
        self.peers.add_or_update_peer(
            peer_id,
            &announcement.nickname,
            true,
            true,
            Some(announcement.noise_public_key.clone()),
            Some(announcement.signing_public_key.clone()),
            false,
        );

        let _ = self.events.send(MeshEvent::PeerAnnounced {
            peer_id: peer_id.to_string(),
            nickname: announcement.nickname,
        });
        self.emit_peer_list();
    }

    fn handle_message(&self, packet: &Packet, peer_id: &str) {
        if !self.addressed_to_us(packet) {
            return;
        }

        let content = String::from_utf8_lossy(&packet.payload).into_owned();
        let _ = self.events.send(MeshEvent::MessageReceived {
            peer_id: peer_id.to_string(),
            content,
            is_broadcast: packet.is_broadcast(),
        });
    }

    fn handle_leave(&self, peer_id: &str) {
        self.peers.disconnect_peer(peer_id);
        self.sessions.remove(peer_id);
        let _ = self.events.send(MeshEvent::PeerLeft {
            peer_id: peer_id.to_string(),
        });
        self.emit_peer_list();
    }

    async fn handle_handshake(&self, packet: &Packet, peer_id: &str) {
        // Handshakes not addressed to us still relay but are not processed
        if let Some(recipient) = packet.recipient_id {
            if recipient != self.my_peer_id_bytes && recipient != BROADCAST_RECIPIENT {
                return;
            }
        }

        match self.sessions.process_handshake(peer_id, &packet.payload) {
            Ok(Some(response)) => {
                debug!("Sending handshake response to {}", peer_id);
                self.send_handshake_message(peer_id, response).await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Handshake with {} failed: {}", peer_id, err);
                return;
            }
        }

        if self.sessions.has_established(peer_id) {
            info!("Noise session established with {}", peer_id);
            let _ = self.events.send(MeshEvent::SessionEstablished {
                peer_id: peer_id.to_string(),
            });
            self.flush_pending_encrypted(peer_id);
        }
    }

    async fn handle_encrypted(&self, packet: &Packet, peer_id: &str) {
        if !self.addressed_to_us(packet) {
            return;
        }

        match self.sessions.decrypt(peer_id, &packet.payload) {
            Some(plaintext) => self.route_noise_payload(peer_id, &plaintext),
            None => {
                // Probably a session mismatch; keep it until a handshake lands
                debug!("Cannot decrypt from {} yet, queueing", peer_id);
                self.queue_pending_encrypted(peer_id, packet.payload.clone());
            }
        }
    }

    fn route_noise_payload(&self, peer_id: &str, plaintext: &[u8]) {
        let Some(payload) = NoisePayload::decode(plaintext) else {
            warn!("Unparseable noise payload from {}", peer_id);
            return;
        };

        match payload.payload_type {
            NoisePayloadType::PrivateMessage => {
                let Some(message) = PrivateMessage::decode(&payload.data) else {
                    warn!("Unparseable private message from {}", peer_id);
                    return;
                };
                let _ = self.events.send(MeshEvent::PrivateMessageReceived {
                    peer_id: peer_id.to_string(),
                    message_id: message.message_id,
                    content: message.content,
                });
            }
            NoisePayloadType::ReadReceipt => {
                let _ = self.events.send(MeshEvent::ReadReceipt {
                    peer_id: peer_id.to_string(),
                    message_id: String::from_utf8_lossy(&payload.data).into_owned(),
                });
            }
            NoisePayloadType::Delivered => {
                let _ = self.events.send(MeshEvent::DeliveryConfirmed {
                    peer_id: peer_id.to_string(),
                    message_id: String::from_utf8_lossy(&payload.data).into_owned(),
                });
            }
            NoisePayloadType::FileTransfer => {
                let _ = self.events.send(MeshEvent::FileReceived {
                    peer_id: peer_id.to_string(),
                    data: payload.data,
                    is_broadcast: false,
                });
            }
        }
    }

    fn queue_pending_encrypted(&self, peer_id: &str, payload: Vec<u8>) {
        let mut pending = self.pending_encrypted.lock().expect("pending lock");
        let queue = pending.entry(peer_id.to_string()).or_default();
        if queue.len() >= MAX_PENDING_ENCRYPTED {
            queue.remove(0);
        }
        queue.push(payload);
    }

    fn flush_pending_encrypted(&self, peer_id: &str) {
        let queued = self
            .pending_encrypted
            .lock()
            .expect("pending lock")
            .remove(peer_id);
        let Some(queued) = queued else { return };

        debug!("Processing {} queued payloads for {}", queued.len(), peer_id);
        for payload in queued {
            match self.sessions.decrypt(peer_id, &payload) {
                Some(plaintext) => self.route_noise_payload(peer_id, &plaintext),
                None => debug!("Dropping undecryptable queued payload from {}", peer_id),
            }
        }
    }

    fn handle_fragment(&self, packet: &Packet, peer_id: &str) {
        if packet.payload.len() <= FRAGMENT_ID_SIZE + 1 {
            debug!("Runt fragment from {}", peer_id);
            return;
        }

        let fragment_id = hex::encode(&packet.payload[..FRAGMENT_ID_SIZE]);
        let is_last = packet.payload[FRAGMENT_ID_SIZE] == 1;
        let chunk = &packet.payload[FRAGMENT_ID_SIZE + 1..];

        let Some(reassembled) = self
            .fragments
            .add_fragment(peer_id, &fragment_id, chunk, is_last)
        else {
            return;
        };

        // Re-inject the reassembled packet as if it arrived whole
        match mesh_wire::decode(&reassembled) {
            Ok(inner) => {
                let inner_peer = inner.sender_hex();
                self.processor.process_packet(inner, &inner_peer);
            }
            Err(err) => warn!("Reassembled packet from {} invalid: {}", peer_id, err),
        }
    }

    fn emit_peer_list(&self) {
        let peers = self.peers.all_peers().into_iter().map(|p| p.id).collect();
        let _ = self.events.send(MeshEvent::PeerListUpdated { peers });
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    fn spawn_announce_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.announce_interval);
            ticker.tick().await; // immediate tick, start() already announced
            loop {
                ticker.tick().await;
                service.send_announce().await;
            }
        })
    }

    fn spawn_maintenance_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.maintenance_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.run_maintenance().await;
            }
        })
    }

    async fn run_maintenance(&self) {
        self.security.sweep_expired(now_millis());
        self.fragments.sweep_expired();
        self.peers.touch(&self.my_peer_id);

        let removed = self.peers.sweep_stale();
        if !removed.is_empty() {
            for peer_id in &removed {
                self.sessions.remove(peer_id);
                self.pending_encrypted
                    .lock()
                    .expect("pending lock")
                    .remove(peer_id);
            }
            debug!("Swept {} stale peers", removed.len());
            self.emit_peer_list();
        }

        // Sessions past a rekey threshold are torn down; the lexicographically
        // smaller peer re-initiates so both sides do not race
        for peer_id in self.sessions.sessions_needing_rekey() {
            info!("Session with {} needs rekey", peer_id);
            self.sessions.remove(&peer_id);
            if self.my_peer_id < peer_id {
                self.initiate_handshake(&peer_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_transport_pair;
    use rand_core::OsRng;

    fn service_with_nickname(
        nickname: &str,
        transport: Arc<dyn Transport>,
    ) -> (Arc<MeshService>, mpsc::UnboundedReceiver<MeshEvent>) {
        let identity = Identity::generate(&mut OsRng);
        let config = ServiceConfig {
            nickname: nickname.to_string(),
            ..ServiceConfig::default()
        };
        MeshService::new(identity, transport, config)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let ((transport, events), _other) = memory_transport_pair();
        let (service, _mesh_events) = service_with_nickname("a", Arc::new(transport));

        service.start(events).await.unwrap();
        // Second start must not re-take the processor event receiver
        let (_tx, rx) = mpsc::unbounded_channel();
        service.start(rx).await.unwrap();
        service.stop().await;
    }

    #[tokio::test]
    async fn test_send_private_requires_session() {
        let ((transport, _events), _other) = memory_transport_pair();
        let (service, _mesh_events) = service_with_nickname("a", Arc::new(transport));
        assert!(service.send_private_message("cafe", "hello").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_quiet() {
        let ((transport, _events), _other) = memory_transport_pair();
        let (service, _mesh_events) = service_with_nickname("a", Arc::new(transport));
        service.stop().await;
    }
}
