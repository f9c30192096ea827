//! The per-peer Noise session registry.
//!
//! Sessions are created atomically on first use (get-or-create through the
//! concurrent map entry API, never read-then-write) and keyed by peer ID.
//! Per-peer FIFO processing upstream guarantees no two operations run
//! concurrently for the same peer; the per-session mutex is the remaining
//! guard for the send path, which the application drives directly.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use mesh_identity::Identity;
use mesh_noise::{NoiseError, NoiseSession, SessionState};

/// Concurrent map of peer ID to Noise session.
pub struct SessionRegistry {
    identity: Arc<Identity>,
    sessions: DashMap<String, Mutex<NoiseSession>>,
}

impl SessionRegistry {
    /// Create a registry deriving session keys from `identity`.
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            sessions: DashMap::new(),
        }
    }

    /// Whether an established session exists for `peer_id`.
    pub fn has_established(&self, peer_id: &str) -> bool {
        self.sessions
            .get(peer_id)
            .map(|entry| entry.lock().expect("session lock").is_established())
            .unwrap_or(false)
    }

    /// Current session state for `peer_id`, if a session exists.
    pub fn state(&self, peer_id: &str) -> Option<SessionState> {
        self.sessions
            .get(peer_id)
            .map(|entry| entry.lock().expect("session lock").state().clone())
    }

    /// Begin a handshake toward `peer_id` as initiator.
    ///
    /// Idempotent: an existing handshaking or established session yields
    /// `None` so the caller does not send a duplicate message 1.
    pub fn initiate_handshake(&self, peer_id: &str) -> Option<Vec<u8>> {
        let entry = self.sessions.entry(peer_id.to_string()).or_insert_with(|| {
            Mutex::new(NoiseSession::new(
                peer_id,
                true,
                self.identity.noise_static_secret(),
            ))
        });

        let mut session = entry.lock().expect("session lock");
        if session.is_established() || session.is_handshaking() {
            debug!("Session with {} already in progress, not re-initiating", peer_id);
            return None;
        }

        // A failed (non-destroyed) session is restarted from scratch
        if matches!(session.state(), SessionState::Failed(_)) {
            *session = NoiseSession::new(peer_id, true, self.identity.noise_static_secret());
        }

        match session.start_handshake() {
            Ok(message) => Some(message),
            Err(err) => {
                warn!("Failed to start handshake with {}: {}", peer_id, err);
                None
            }
        }
    }

    /// Feed a received handshake message for `peer_id`, creating a responder
    /// session when none exists.
    ///
    /// On failure the session is removed so a fresh handshake can begin.
    pub fn process_handshake(
        &self,
        peer_id: &str,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        let entry = self.sessions.entry(peer_id.to_string()).or_insert_with(|| {
            Mutex::new(NoiseSession::new(
                peer_id,
                false,
                self.identity.noise_static_secret(),
            ))
        });

        let result = entry
            .lock()
            .expect("session lock")
            .process_handshake_message(message);
        drop(entry);

        if let Err(ref err) = result {
            warn!("Handshake with {} failed: {}", peer_id, err);
            self.remove(peer_id);
        }
        result
    }

    /// Encrypt `data` for `peer_id`. `None` without an established session.
    pub fn encrypt(&self, peer_id: &str, data: &[u8]) -> Option<Vec<u8>> {
        let entry = self.sessions.get(peer_id)?;
        let mut session = entry.lock().expect("session lock");
        if !session.is_established() {
            return None;
        }
        session.encrypt(data).ok()
    }

    /// Decrypt `data` from `peer_id`. `None` on any failure; a single bad
    /// packet does not tear the session down.
    pub fn decrypt(&self, peer_id: &str, data: &[u8]) -> Option<Vec<u8>> {
        let entry = self.sessions.get(peer_id)?;
        let mut session = entry.lock().expect("session lock");
        if !session.is_established() {
            return None;
        }
        session.decrypt(data).ok()
    }

    /// The peer's static key as proven by the handshake.
    pub fn remote_static_key(&self, peer_id: &str) -> Option<[u8; 32]> {
        self.sessions
            .get(peer_id)
            .and_then(|entry| entry.lock().expect("session lock").remote_static_public_key())
    }

    /// Peers whose sessions crossed a rekey threshold.
    pub fn sessions_needing_rekey(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().lock().expect("session lock").needs_rekey())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Destroy and remove the session for `peer_id`.
    pub fn remove(&self, peer_id: &str) {
        if let Some((_, session)) = self.sessions.remove(peer_id) {
            session.lock().expect("session lock").destroy();
        }
    }

    /// Destroy every session.
    pub fn clear_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().lock().expect("session lock").destroy();
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(Identity::generate(&mut OsRng)))
    }

    fn registry_pair() -> (SessionRegistry, SessionRegistry, String, String) {
        let a = registry();
        let b = registry();
        let a_id = a.identity.fingerprint();
        let b_id = b.identity.fingerprint();
        (a, b, a_id, b_id)
    }

    #[test]
    fn test_initiate_is_idempotent() {
        let registry = registry();
        assert!(registry.initiate_handshake("peer").is_some());
        // Second initiation while handshaking yields nothing to send
        assert!(registry.initiate_handshake("peer").is_none());
    }

    #[test]
    fn test_full_handshake_through_registries() {
        let (a, b, a_id, b_id) = registry_pair();

        let message_1 = a.initiate_handshake(&b_id).unwrap();
        let message_2 = b.process_handshake(&a_id, &message_1).unwrap().unwrap();
        let message_3 = a.process_handshake(&b_id, &message_2).unwrap().unwrap();
        assert!(b.process_handshake(&a_id, &message_3).unwrap().is_none());

        assert!(a.has_established(&b_id));
        assert!(b.has_established(&a_id));

        let ciphertext = a.encrypt(&b_id, b"registry hello").unwrap();
        assert_eq!(b.decrypt(&a_id, &ciphertext).unwrap(), b"registry hello");
    }

    #[test]
    fn test_failed_handshake_removes_session() {
        let registry = registry();
        // Garbage of the right size for message 1 creates a responder whose
        // next message (wrong size) kills the session
        let result = registry.process_handshake("peer", &[0u8; 64]);
        assert!(result.is_err());
        assert!(registry.state("peer").is_none());
    }

    #[test]
    fn test_encrypt_without_session() {
        let registry = registry();
        assert!(registry.encrypt("nobody", b"data").is_none());
        assert!(registry.decrypt("nobody", b"data").is_none());
    }
}
