//! Active peer tracking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Peers unseen for this long are swept.
pub const STALE_PEER_TIMEOUT: Duration = Duration::from_secs(180);

/// Mutable per-peer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer ID (16 hex chars of the X25519 public key)
    pub id: String,
    /// Nickname from the peer's last announcement
    pub nickname: String,
    /// Whether the peer is currently reachable
    pub is_connected: bool,
    /// Whether we hold a direct link rather than a relayed path
    pub is_direct_connection: bool,
    /// X25519 static public key from the peer's announcement
    pub noise_public_key: Option<Vec<u8>>,
    /// Ed25519 public key used to verify this peer's signatures
    pub signing_public_key: Option<Vec<u8>>,
    /// True once a signature from the claimed signing key has been checked
    pub is_verified_nickname: bool,
    /// Last time any packet arrived from this peer
    pub last_seen: Instant,
}

/// Thread-safe registry of known peers.
///
/// Mutated from the service/processor path only, read from many; the lock is
/// never held across I/O.
pub struct PeerManager {
    peers: Mutex<HashMap<String, PeerInfo>>,
}

impl PeerManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or refresh a peer record, returning the updated copy.
    ///
    /// Existing key material is kept when the update carries none.
    #[allow(clippy::too_many_arguments)]
    pub fn add_or_update_peer(
        &self,
        peer_id: &str,
        nickname: &str,
        is_connected: bool,
        is_direct_connection: bool,
        noise_public_key: Option<Vec<u8>>,
        signing_public_key: Option<Vec<u8>>,
        is_verified: bool,
    ) -> PeerInfo {
        let mut peers = self.peers.lock().expect("peer lock");
        let peer = peers
            .entry(peer_id.to_string())
            .and_modify(|peer| {
                peer.nickname = nickname.to_string();
                peer.is_connected = is_connected;
                peer.is_direct_connection = is_direct_connection;
                if noise_public_key.is_some() {
                    peer.noise_public_key = noise_public_key.clone();
                }
                if signing_public_key.is_some() {
                    peer.signing_public_key = signing_public_key.clone();
                }
                peer.is_verified_nickname = is_verified;
                peer.last_seen = Instant::now();
            })
            .or_insert_with(|| PeerInfo {
                id: peer_id.to_string(),
                nickname: nickname.to_string(),
                is_connected,
                is_direct_connection,
                noise_public_key,
                signing_public_key,
                is_verified_nickname: is_verified,
                last_seen: Instant::now(),
            });

        debug!("Peer {} updated ({})", peer_id, peer.nickname);
        peer.clone()
    }

    /// Record that a packet arrived from `peer_id` without other changes.
    pub fn touch(&self, peer_id: &str) {
        let mut peers = self.peers.lock().expect("peer lock");
        if let Some(peer) = peers.get_mut(peer_id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Mark the peer's claimed nickname as signature-verified.
    pub fn mark_verified(&self, peer_id: &str) {
        let mut peers = self.peers.lock().expect("peer lock");
        if let Some(peer) = peers.get_mut(peer_id) {
            peer.is_verified_nickname = true;
        }
    }

    /// Look up one peer.
    pub fn get_peer(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.lock().expect("peer lock").get(peer_id).cloned()
    }

    /// The peer's announced signing key, used for signature validation.
    pub fn signing_key(&self, peer_id: &str) -> Option<Vec<u8>> {
        self.peers
            .lock()
            .expect("peer lock")
            .get(peer_id)
            .and_then(|peer| peer.signing_public_key.clone())
    }

    /// Snapshot of all known peers.
    pub fn all_peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().expect("peer lock").values().cloned().collect()
    }

    /// Whether the peer is connected and recently seen.
    pub fn is_peer_active(&self, peer_id: &str) -> bool {
        self.peers
            .lock()
            .expect("peer lock")
            .get(peer_id)
            .map(|peer| peer.is_connected && peer.last_seen.elapsed() < STALE_PEER_TIMEOUT)
            .unwrap_or(false)
    }

    /// Flag a peer as disconnected, keeping its record.
    pub fn disconnect_peer(&self, peer_id: &str) {
        let mut peers = self.peers.lock().expect("peer lock");
        if let Some(peer) = peers.get_mut(peer_id) {
            peer.is_connected = false;
        }
    }

    /// Drop a peer entirely.
    pub fn remove_peer(&self, peer_id: &str) {
        self.peers.lock().expect("peer lock").remove(peer_id);
    }

    /// Remove disconnected and stale peers, returning the removed IDs.
    pub fn sweep_stale(&self) -> Vec<String> {
        let mut peers = self.peers.lock().expect("peer lock");
        let stale: Vec<String> = peers
            .iter()
            .filter(|(_, peer)| {
                !peer.is_connected || peer.last_seen.elapsed() > STALE_PEER_TIMEOUT
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            peers.remove(id);
        }
        stale
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        self.peers.lock().expect("peer lock").clear();
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}
