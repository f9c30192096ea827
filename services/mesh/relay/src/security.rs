//! Packet validation: duplicates, clock skew, and signatures.
//!
//! Every packet passes through here before any relay or dispatch decision.
//! The dedup cache doubles as the relay guard: a packet that was already
//! processed is never rebroadcast again, which is what stops flood storms in
//! a mesh with cycles.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use mesh_wire::{MessageType, Packet};

/// Maximum tolerated future timestamp, in milliseconds.
pub const MAX_CLOCK_SKEW_MS: u64 = 15 * 60 * 1000;

/// Dedup entries older than this are swept, in milliseconds.
const MESSAGE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Hard cap on tracked message IDs.
const MAX_PROCESSED_MESSAGES: usize = 5000;

/// Announce packets repeat on a cadence; duplicates inside this window are
/// expected and dropped silently, in milliseconds.
const ANNOUNCE_DEDUP_WINDOW_MS: u64 = 60 * 1000;

/// Hard cap on tracked announcements.
const MAX_TRACKED_ANNOUNCEMENTS: usize = 1000;

/// Why a packet was dropped during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Our own packet came back around the mesh
    OwnPacket,
    /// Already processed (or announce repeated inside its window)
    Duplicate,
    /// Timestamp too far in the future
    FutureTimestamp,
    /// Signature present but failed verification against the known key
    BadSignature,
    /// Sender has no known signing key and this is not an announcement
    UnknownSender,
}

/// Validates packets against replayed floods, skewed clocks, and forged
/// signatures. All tracking state is bounded.
pub struct SecurityManager {
    my_peer_id: String,
    processed: Mutex<HashMap<String, u64>>,
    announcements: Mutex<HashMap<String, u64>>,
}

impl SecurityManager {
    /// Create a validator for the local peer ID.
    pub fn new(my_peer_id: &str) -> Self {
        Self {
            my_peer_id: my_peer_id.to_string(),
            processed: Mutex::new(HashMap::new()),
            announcements: Mutex::new(HashMap::new()),
        }
    }

    /// Validate a packet from `peer_id`.
    ///
    /// `signing_key` is the sender's known Ed25519 key, if any. Unknown
    /// senders may only deliver announcements, which is how a peer becomes
    /// known in the first place.
    pub fn validate_packet(
        &self,
        packet: &Packet,
        peer_id: &str,
        signing_key: Option<&[u8]>,
        now_ms: u64,
    ) -> Result<(), DropReason> {
        if peer_id == self.my_peer_id {
            return Err(DropReason::OwnPacket);
        }

        if packet.timestamp > now_ms + MAX_CLOCK_SKEW_MS {
            warn!(
                "Dropping packet from {} stamped {}ms in the future",
                peer_id,
                packet.timestamp - now_ms
            );
            return Err(DropReason::FutureTimestamp);
        }

        let message_id = message_fingerprint(packet, peer_id);

        if packet.packet_type == MessageType::Announce {
            self.check_announce(&message_id, now_ms)?;
        } else {
            self.check_duplicate(&message_id, now_ms)?;
        }

        match signing_key {
            Some(key) => {
                if let Some(ref signature) = packet.signature {
                    let signable = packet
                        .to_signable_bytes()
                        .map_err(|_| DropReason::BadSignature)?;
                    if !mesh_identity::verify(key, &signable, signature) {
                        warn!("Signature check failed for {}", peer_id);
                        return Err(DropReason::BadSignature);
                    }
                }
            }
            None => {
                // Pre-verification, only identity announcements are accepted
                if packet.packet_type != MessageType::Announce {
                    debug!(
                        "Dropping {:?} from unknown sender {}",
                        packet.packet_type, peer_id
                    );
                    return Err(DropReason::UnknownSender);
                }
            }
        }

        Ok(())
    }

    fn check_announce(&self, message_id: &str, now_ms: u64) -> Result<(), DropReason> {
        let mut announcements = self.announcements.lock().expect("announce lock");

        if let Some(&last) = announcements.get(message_id) {
            if now_ms.saturating_sub(last) < ANNOUNCE_DEDUP_WINDOW_MS {
                return Err(DropReason::Duplicate);
            }
        }
        announcements.insert(message_id.to_string(), now_ms);

        if announcements.len() > MAX_TRACKED_ANNOUNCEMENTS {
            evict(&mut announcements, now_ms, MESSAGE_TIMEOUT_MS, MAX_TRACKED_ANNOUNCEMENTS);
        }
        Ok(())
    }

    fn check_duplicate(&self, message_id: &str, now_ms: u64) -> Result<(), DropReason> {
        let mut processed = self.processed.lock().expect("dedup lock");

        if processed.contains_key(message_id) {
            return Err(DropReason::Duplicate);
        }
        processed.insert(message_id.to_string(), now_ms);

        if processed.len() > MAX_PROCESSED_MESSAGES {
            evict(&mut processed, now_ms, MESSAGE_TIMEOUT_MS, MAX_PROCESSED_MESSAGES);
        }
        Ok(())
    }

    /// Drop expired dedup entries. Called on a periodic sweep.
    pub fn sweep_expired(&self, now_ms: u64) {
        self.processed
            .lock()
            .expect("dedup lock")
            .retain(|_, &mut stamp| now_ms.saturating_sub(stamp) <= MESSAGE_TIMEOUT_MS);
        self.announcements
            .lock()
            .expect("announce lock")
            .retain(|_, &mut stamp| now_ms.saturating_sub(stamp) <= MESSAGE_TIMEOUT_MS);
    }

    /// Forget all tracking state.
    pub fn clear_all(&self) {
        self.processed.lock().expect("dedup lock").clear();
        self.announcements.lock().expect("announce lock").clear();
    }
}

/// Packet+sender fingerprint used as the dedup key.
///
/// Includes the payload so distinct packets stamped in the same millisecond
/// (fragments of one message, back-to-back sends) are not confused.
fn message_fingerprint(packet: &Packet, peer_id: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    peer_id.hash(&mut hasher);
    packet.timestamp.hash(&mut hasher);
    (packet.packet_type as u8).hash(&mut hasher);
    packet.payload.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Expire old entries; if the map is still over `cap`, evict oldest-first
/// rather than growing without bound.
fn evict(map: &mut HashMap<String, u64>, now_ms: u64, timeout_ms: u64, cap: usize) {
    map.retain(|_, &mut stamp| now_ms.saturating_sub(stamp) <= timeout_ms);

    while map.len() > cap {
        let oldest = map
            .iter()
            .min_by_key(|(_, &stamp)| stamp)
            .map(|(key, _)| key.clone());
        match oldest {
            Some(key) => map.remove(&key),
            None => break,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_identity::Identity;
    use mesh_wire::{MessageType, Packet};

    const NOW: u64 = 1_700_000_000_000;

    fn packet(packet_type: MessageType, timestamp: u64) -> Packet {
        let mut packet = Packet::new(packet_type, 3, "bbbb", Vec::new());
        packet.timestamp = timestamp;
        packet
    }

    #[test]
    fn test_own_packets_rejected() {
        let security = SecurityManager::new("aaaa");
        let packet = packet(MessageType::Message, NOW);
        assert_eq!(
            security.validate_packet(&packet, "aaaa", Some(&[0u8; 32]), NOW),
            Err(DropReason::OwnPacket)
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let security = SecurityManager::new("aaaa");
        let packet = packet(MessageType::Message, NOW);
        assert!(security
            .validate_packet(&packet, "bbbb", Some(&[0u8; 32]), NOW)
            .is_ok());
        assert_eq!(
            security.validate_packet(&packet, "bbbb", Some(&[0u8; 32]), NOW),
            Err(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let security = SecurityManager::new("aaaa");
        let packet = packet(MessageType::Message, NOW + MAX_CLOCK_SKEW_MS + 1);
        assert_eq!(
            security.validate_packet(&packet, "bbbb", Some(&[0u8; 32]), NOW),
            Err(DropReason::FutureTimestamp)
        );
    }

    #[test]
    fn test_unknown_sender_only_announces() {
        let security = SecurityManager::new("aaaa");
        assert_eq!(
            security.validate_packet(&packet(MessageType::Message, NOW), "bbbb", None, NOW),
            Err(DropReason::UnknownSender)
        );
        assert!(security
            .validate_packet(&packet(MessageType::Announce, NOW), "bbbb", None, NOW)
            .is_ok());
    }

    #[test]
    fn test_announce_window_dedup() {
        let security = SecurityManager::new("aaaa");
        let announce = packet(MessageType::Announce, NOW);
        assert!(security.validate_packet(&announce, "bbbb", None, NOW).is_ok());
        assert_eq!(
            security.validate_packet(&announce, "bbbb", None, NOW + 1000),
            Err(DropReason::Duplicate)
        );
        // Outside the window the same announcement is fresh again
        assert!(security
            .validate_packet(&announce, "bbbb", None, NOW + ANNOUNCE_DEDUP_WINDOW_MS + 1)
            .is_ok());
    }

    #[test]
    fn test_signature_verified_against_known_key() {
        let security = SecurityManager::new("aaaa");
        let identity = Identity::from_seed(&[9u8; 32]).unwrap();

        let mut signed = packet(MessageType::Message, NOW);
        let signable = signed.to_signable_bytes().unwrap();
        signed.signature = Some(identity.sign(&signable));

        assert!(security
            .validate_packet(&signed, "bbbb", Some(&identity.signing_public_key()), NOW)
            .is_ok());

        let mut forged = packet(MessageType::Message, NOW + 5);
        forged.signature = Some([0u8; 64]);
        assert_eq!(
            security.validate_packet(&forged, "bbbb", Some(&identity.signing_public_key()), NOW),
            Err(DropReason::BadSignature)
        );
    }

    #[test]
    fn test_dedup_cache_is_bounded() {
        let security = SecurityManager::new("aaaa");
        for i in 0..(MAX_PROCESSED_MESSAGES + 100) {
            let message = packet(MessageType::Message, NOW + i as u64);
            let _ = security.validate_packet(&message, "bbbb", Some(&[0u8; 32]), NOW + i as u64);
        }
        assert!(security.processed.lock().unwrap().len() <= MAX_PROCESSED_MESSAGES);
    }

    #[test]
    fn test_sweep_expires_old_entries() {
        let security = SecurityManager::new("aaaa");
        let old = packet(MessageType::Message, NOW);
        security
            .validate_packet(&old, "bbbb", Some(&[0u8; 32]), NOW)
            .unwrap();

        security.sweep_expired(NOW + MESSAGE_TIMEOUT_MS + 1);
        assert!(security.processed.lock().unwrap().is_empty());
    }
}
