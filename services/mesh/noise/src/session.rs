//! The per-peer Noise session state machine.
//!
//! One session per remote peer, keyed by peer ID. Sessions move
//! `Uninitialized → Handshaking → Established`, can fail from any state, and
//! can be reset back to `Uninitialized` unless destroyed.

use std::time::{Duration, Instant};

use rand_core::OsRng;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey, ReusableSecret, StaticSecret};
use zeroize::Zeroize;

use crate::cipher::{CipherState, SymmetricState, TAG_SIZE};
use crate::error::NoiseError;
use crate::replay::ReplayWindow;

/// The Noise protocol this stack speaks.
pub const PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// XX message 1: the initiator's ephemeral key.
pub const XX_MESSAGE_1_SIZE: usize = 32;
/// XX message 2: ephemeral + encrypted static + encrypted empty payload.
pub const XX_MESSAGE_2_SIZE: usize = 96;
/// XX message 3: the initiator's encrypted static key.
pub const XX_MESSAGE_3_SIZE: usize = 48;

/// Wire nonce prefix size in bytes.
pub const NONCE_SIZE: usize = 4;

/// Rekey after this much session time.
pub const REKEY_TIME_LIMIT: Duration = Duration::from_secs(3600);
/// Rekey after this many messages in either direction.
pub const REKEY_MESSAGE_LIMIT: u64 = 10_000;
/// Log a warning above this nonce; not yet fatal.
pub const HIGH_NONCE_WARNING_THRESHOLD: u64 = 1_000_000;

/// Session lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake attempted yet
    Uninitialized,
    /// XX pattern in flight
    Handshaking,
    /// Transport keys derived; encrypt/decrypt valid
    Established,
    /// Terminal error state with the failure reason
    Failed(String),
}

struct Handshake {
    symmetric: SymmetricState,
    local_ephemeral: Option<ReusableSecret>,
    remote_ephemeral: Option<PublicKey>,
}

impl Handshake {
    fn new() -> Self {
        let mut symmetric = SymmetricState::initialize(PROTOCOL_NAME.as_bytes());
        symmetric.mix_hash(&[]); // empty prologue
        Self {
            symmetric,
            local_ephemeral: None,
            remote_ephemeral: None,
        }
    }
}

/// A per-peer Noise XX session.
pub struct NoiseSession {
    peer_id: String,
    is_initiator: bool,
    local_static: StaticSecret,
    local_static_public: PublicKey,
    state: SessionState,
    handshake: Option<Handshake>,
    send_cipher: Option<CipherState>,
    recv_cipher: Option<CipherState>,
    created_at: Instant,
    messages_sent: u64,
    messages_received: u64,
    replay: ReplayWindow,
    remote_static: Option<[u8; 32]>,
    handshake_hash: Option<[u8; 32]>,
    destroyed: bool,
}

impl NoiseSession {
    /// Create a session for `peer_id` using the local static Noise keypair.
    pub fn new(peer_id: &str, is_initiator: bool, local_static: StaticSecret) -> Self {
        let local_static_public = PublicKey::from(&local_static);
        debug!(
            "Created {} session for {}",
            if is_initiator { "initiator" } else { "responder" },
            peer_id,
        );

        Self {
            peer_id: peer_id.to_string(),
            is_initiator,
            local_static,
            local_static_public,
            state: SessionState::Uninitialized,
            handshake: None,
            send_cipher: None,
            recv_cipher: None,
            created_at: Instant::now(),
            messages_sent: 0,
            messages_received: 0,
            replay: ReplayWindow::new(),
            remote_static: None,
            handshake_hash: None,
            destroyed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether transport encryption is available.
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Whether a handshake is in flight.
    pub fn is_handshaking(&self) -> bool {
        self.state == SessionState::Handshaking
    }

    /// Whether this side initiates.
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Local static public key bytes.
    pub fn local_static_public_key(&self) -> [u8; 32] {
        *self.local_static_public.as_bytes()
    }

    /// Remote static public key, once the handshake proved it.
    pub fn remote_static_public_key(&self) -> Option<[u8; 32]> {
        self.remote_static
    }

    /// Handshake transcript hash for channel binding, once established.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.handshake_hash
    }

    /// Begin the XX pattern. Initiator-only, `Uninitialized`-only.
    ///
    /// Returns exactly [`XX_MESSAGE_1_SIZE`] bytes: the ephemeral public key.
    pub fn start_handshake(&mut self) -> Result<Vec<u8>, NoiseError> {
        if self.destroyed {
            return Err(NoiseError::Destroyed);
        }
        if !self.is_initiator {
            return Err(NoiseError::InvalidState("only the initiator starts a handshake"));
        }
        if self.state != SessionState::Uninitialized {
            return Err(NoiseError::InvalidState("handshake already started"));
        }

        let mut handshake = Handshake::new();
        let ephemeral = ReusableSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);

        handshake.symmetric.mix_hash(ephemeral_public.as_bytes());
        handshake.local_ephemeral = Some(ephemeral);

        self.handshake = Some(handshake);
        self.state = SessionState::Handshaking;

        debug!("Sending XX message 1 to {}", self.peer_id);
        Ok(ephemeral_public.as_bytes().to_vec())
    }

    /// Advance the XX pattern with a peer message.
    ///
    /// Returns the response message when one is due (message 2 from the
    /// responder, message 3 from the initiator), `None` when the pattern
    /// completed without a response. Any size or MAC failure moves the
    /// session to `Failed` and surfaces an error; the session is never left
    /// half-updated.
    pub fn process_handshake_message(
        &mut self,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        if self.destroyed {
            return Err(NoiseError::Destroyed);
        }

        // A fresh 32-byte message 1 while the responder is mid-handshake
        // means the peer restarted; drop our half and process it cleanly.
        if !self.is_initiator
            && self.state == SessionState::Handshaking
            && message.len() == XX_MESSAGE_1_SIZE
        {
            warn!(
                "Message 1 from {} while already handshaking, restarting",
                self.peer_id
            );
            self.reset();
        }

        match (self.is_initiator, &self.state) {
            (false, SessionState::Uninitialized) => self.responder_read_message_1(message),
            (true, SessionState::Handshaking) => self.initiator_read_message_2(message),
            (false, SessionState::Handshaking) => self.responder_read_message_3(message),
            _ => Err(NoiseError::InvalidState("no handshake in progress")),
        }
    }

    fn fail(&mut self, error: NoiseError) -> NoiseError {
        self.state = SessionState::Failed(error.to_string());
        self.handshake = None;
        error
    }

    fn check_size(&mut self, message: &[u8], expected: usize) -> Result<(), NoiseError> {
        if message.len() != expected {
            return Err(self.fail(NoiseError::MessageSize {
                expected,
                got: message.len(),
            }));
        }
        Ok(())
    }

    /// Responder: <- e, then -> e, ee, s, es
    fn responder_read_message_1(
        &mut self,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        self.check_size(message, XX_MESSAGE_1_SIZE)?;

        let mut handshake = Handshake::new();
        self.state = SessionState::Handshaking;

        let remote_ephemeral = PublicKey::from(to_key_bytes(message));
        handshake.symmetric.mix_hash(remote_ephemeral.as_bytes());

        // -> e
        let ephemeral = ReusableSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        handshake.symmetric.mix_hash(ephemeral_public.as_bytes());

        // ee
        handshake
            .symmetric
            .mix_key(ephemeral.diffie_hellman(&remote_ephemeral).as_bytes());

        // s
        let static_public = self.local_static_public;
        let encrypted_static = match handshake
            .symmetric
            .encrypt_and_hash(static_public.as_bytes())
        {
            Ok(ciphertext) => ciphertext,
            Err(err) => return Err(self.fail(err)),
        };

        // es (responder side: our static, their ephemeral)
        handshake
            .symmetric
            .mix_key(self.local_static.diffie_hellman(&remote_ephemeral).as_bytes());

        // empty payload, encrypted under the es key
        let encrypted_payload = match handshake.symmetric.encrypt_and_hash(&[]) {
            Ok(ciphertext) => ciphertext,
            Err(err) => return Err(self.fail(err)),
        };

        let mut response = Vec::with_capacity(XX_MESSAGE_2_SIZE);
        response.extend_from_slice(ephemeral_public.as_bytes());
        response.extend_from_slice(&encrypted_static);
        response.extend_from_slice(&encrypted_payload);
        debug_assert_eq!(response.len(), XX_MESSAGE_2_SIZE);

        handshake.local_ephemeral = Some(ephemeral);
        handshake.remote_ephemeral = Some(remote_ephemeral);
        self.handshake = Some(handshake);

        debug!("Sending XX message 2 to {}", self.peer_id);
        Ok(Some(response))
    }

    /// Initiator: <- e, ee, s, es, then -> s, se
    fn initiator_read_message_2(
        &mut self,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        self.check_size(message, XX_MESSAGE_2_SIZE)?;

        let mut handshake = self
            .handshake
            .take()
            .ok_or(NoiseError::InvalidState("no handshake in progress"))?;

        let local_ephemeral = handshake
            .local_ephemeral
            .take()
            .ok_or(NoiseError::InvalidState("no handshake in progress"))?;

        let remote_ephemeral = PublicKey::from(to_key_bytes(&message[..32]));
        handshake.symmetric.mix_hash(remote_ephemeral.as_bytes());

        // ee
        handshake
            .symmetric
            .mix_key(local_ephemeral.diffie_hellman(&remote_ephemeral).as_bytes());

        // s
        let remote_static_bytes = match handshake.symmetric.decrypt_and_hash(&message[32..80]) {
            Ok(plaintext) => plaintext,
            Err(err) => return Err(self.fail(err)),
        };
        let remote_static = PublicKey::from(to_key_bytes(&remote_static_bytes));

        // es (initiator side: our ephemeral, their static)
        handshake
            .symmetric
            .mix_key(local_ephemeral.diffie_hellman(&remote_static).as_bytes());

        // empty payload
        if let Err(err) = handshake.symmetric.decrypt_and_hash(&message[80..]) {
            return Err(self.fail(err));
        }

        // -> s
        let encrypted_static = match handshake
            .symmetric
            .encrypt_and_hash(self.local_static_public.as_bytes())
        {
            Ok(ciphertext) => ciphertext,
            Err(err) => return Err(self.fail(err)),
        };
        debug_assert_eq!(encrypted_static.len(), XX_MESSAGE_3_SIZE);

        // se (initiator side: our static, their ephemeral)
        handshake
            .symmetric
            .mix_key(self.local_static.diffie_hellman(&remote_ephemeral).as_bytes());

        self.complete_handshake(&handshake, *remote_static.as_bytes());
        debug!("Sending XX message 3 to {}, session established", self.peer_id);
        Ok(Some(encrypted_static))
    }

    /// Responder: <- s, se
    fn responder_read_message_3(
        &mut self,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        self.check_size(message, XX_MESSAGE_3_SIZE)?;

        let mut handshake = self
            .handshake
            .take()
            .ok_or(NoiseError::InvalidState("no handshake in progress"))?;

        let local_ephemeral = handshake
            .local_ephemeral
            .take()
            .ok_or(NoiseError::InvalidState("no handshake in progress"))?;

        // s
        let remote_static_bytes = match handshake.symmetric.decrypt_and_hash(message) {
            Ok(plaintext) => plaintext,
            Err(err) => return Err(self.fail(err)),
        };
        let remote_static = PublicKey::from(to_key_bytes(&remote_static_bytes));

        // se (responder side: our ephemeral, their static)
        handshake
            .symmetric
            .mix_key(local_ephemeral.diffie_hellman(&remote_static).as_bytes());

        self.complete_handshake(&handshake, *remote_static.as_bytes());
        debug!("XX handshake with {} established", self.peer_id);
        Ok(None)
    }

    fn complete_handshake(&mut self, handshake: &Handshake, remote_static: [u8; 32]) {
        let (k1, k2) = handshake.symmetric.split();
        if self.is_initiator {
            self.send_cipher = Some(k1);
            self.recv_cipher = Some(k2);
        } else {
            self.send_cipher = Some(k2);
            self.recv_cipher = Some(k1);
        }

        self.remote_static = Some(remote_static);
        self.handshake_hash = Some(handshake.symmetric.handshake_hash());
        self.handshake = None;
        self.messages_sent = 0;
        self.messages_received = 0;
        self.replay.reset();
        self.created_at = Instant::now();
        self.state = SessionState::Established;
    }

    /// Encrypt a transport message.
    ///
    /// Output is the 4-byte big-endian send counter followed by the AEAD
    /// ciphertext.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.destroyed {
            return Err(NoiseError::Destroyed);
        }
        if self.state != SessionState::Established {
            return Err(NoiseError::InvalidState("session not established"));
        }

        if self.messages_sent > u32::MAX as u64 {
            return Err(NoiseError::NonceExceeded);
        }
        let nonce = self.messages_sent;

        let cipher = self
            .send_cipher
            .as_ref()
            .ok_or(NoiseError::EncryptionFailed)?;
        let ciphertext = cipher.encrypt_at(nonce, &[], plaintext)?;
        self.messages_sent += 1;

        if nonce > HIGH_NONCE_WARNING_THRESHOLD {
            warn!(
                "High send nonce {} for {}, consider rekeying",
                nonce, self.peer_id
            );
        }

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&(nonce as u32).to_be_bytes());
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    /// Decrypt a transport message produced by [`NoiseSession::encrypt`].
    ///
    /// Replay state is committed only after the AEAD check passes: a replayed
    /// nonce, an out-of-window nonce, or a bad MAC all fail without mutating
    /// the window.
    pub fn decrypt(&mut self, combined: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.destroyed {
            return Err(NoiseError::Destroyed);
        }
        if self.state != SessionState::Established {
            return Err(NoiseError::InvalidState("session not established"));
        }

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(NoiseError::DecryptionFailed);
        }

        let nonce = u32::from_be_bytes(combined[..NONCE_SIZE].try_into().expect("4 bytes")) as u64;
        if !self.replay.is_valid(nonce) {
            warn!("Replay detected: nonce {} rejected for {}", nonce, self.peer_id);
            return Err(NoiseError::DecryptionFailed);
        }

        let cipher = self
            .recv_cipher
            .as_ref()
            .ok_or(NoiseError::DecryptionFailed)?;
        let plaintext = cipher.decrypt_at(nonce, &[], &combined[NONCE_SIZE..])?;

        // Committed only now that the message proved authentic
        self.replay.mark_seen(nonce);
        self.messages_received += 1;

        if nonce > HIGH_NONCE_WARNING_THRESHOLD {
            warn!(
                "High receive nonce {} from {}, consider rekeying",
                nonce, self.peer_id
            );
        }

        Ok(plaintext)
    }

    /// Whether the caller should proactively re-handshake.
    pub fn needs_rekey(&self) -> bool {
        if self.state != SessionState::Established {
            return false;
        }

        self.created_at.elapsed() > REKEY_TIME_LIMIT
            || self.messages_sent + self.messages_received > REKEY_MESSAGE_LIMIT
    }

    /// Return to `Uninitialized`, clearing all handshake and transport state.
    /// A destroyed session stays destroyed.
    pub fn reset(&mut self) {
        if self.destroyed {
            return;
        }

        self.handshake = None;
        self.send_cipher = None;
        self.recv_cipher = None;
        self.messages_sent = 0;
        self.messages_received = 0;
        self.replay.reset();
        self.remote_static = None;
        self.handshake_hash = None;
        self.state = SessionState::Uninitialized;
    }

    /// Zeroize key material and mark the session terminally failed.
    pub fn destroy(&mut self) {
        self.handshake = None;
        self.send_cipher = None;
        self.recv_cipher = None;

        if let Some(ref mut key) = self.remote_static {
            key.zeroize();
        }
        self.remote_static = None;
        if let Some(ref mut hash) = self.handshake_hash {
            hash.zeroize();
        }
        self.handshake_hash = None;

        self.state = SessionState::Failed("session destroyed".to_string());
        self.destroyed = true;
        debug!("Session destroyed for {}", self.peer_id);
    }
}

impl Drop for NoiseSession {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroy();
        }
    }
}

fn to_key_bytes(slice: &[u8]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&slice[..32]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_pair() -> (NoiseSession, NoiseSession) {
        let initiator_static = StaticSecret::random_from_rng(OsRng);
        let responder_static = StaticSecret::random_from_rng(OsRng);
        (
            NoiseSession::new("responder", true, initiator_static),
            NoiseSession::new("initiator", false, responder_static),
        )
    }

    fn established_pair() -> (NoiseSession, NoiseSession) {
        let (mut initiator, mut responder) = session_pair();
        let message_1 = initiator.start_handshake().unwrap();
        let message_2 = responder
            .process_handshake_message(&message_1)
            .unwrap()
            .unwrap();
        let message_3 = initiator
            .process_handshake_message(&message_2)
            .unwrap()
            .unwrap();
        assert!(responder
            .process_handshake_message(&message_3)
            .unwrap()
            .is_none());
        (initiator, responder)
    }

    #[test]
    fn test_handshake_message_sizes() {
        let (mut initiator, mut responder) = session_pair();

        let message_1 = initiator.start_handshake().unwrap();
        assert_eq!(message_1.len(), XX_MESSAGE_1_SIZE);

        let message_2 = responder
            .process_handshake_message(&message_1)
            .unwrap()
            .unwrap();
        assert_eq!(message_2.len(), XX_MESSAGE_2_SIZE);

        let message_3 = initiator
            .process_handshake_message(&message_2)
            .unwrap()
            .unwrap();
        assert_eq!(message_3.len(), XX_MESSAGE_3_SIZE);
    }

    #[test]
    fn test_full_handshake_establishes_both_sides() {
        let (initiator, responder) = established_pair();
        assert!(initiator.is_established());
        assert!(responder.is_established());

        // Each side learned the other's static key
        assert_eq!(
            initiator.remote_static_public_key().unwrap(),
            responder.local_static_public_key()
        );
        assert_eq!(
            responder.remote_static_public_key().unwrap(),
            initiator.local_static_public_key()
        );

        // Transcript hashes agree
        assert_eq!(initiator.handshake_hash(), responder.handshake_hash());
    }

    #[test]
    fn test_transport_roundtrip_both_directions() {
        let (mut initiator, mut responder) = established_pair();

        let to_responder = initiator.encrypt(b"hello").unwrap();
        assert_eq!(responder.decrypt(&to_responder).unwrap(), b"hello");

        let to_initiator = responder.encrypt(b"hello back").unwrap();
        assert_eq!(initiator.decrypt(&to_initiator).unwrap(), b"hello back");
    }

    #[test]
    fn test_nonce_prefix_is_big_endian_counter() {
        let (mut initiator, _responder) = established_pair();
        let first = initiator.encrypt(b"x").unwrap();
        let second = initiator.encrypt(b"x").unwrap();
        assert_eq!(&first[..NONCE_SIZE], &[0, 0, 0, 0]);
        assert_eq!(&second[..NONCE_SIZE], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_replayed_message_rejected() {
        let (mut initiator, mut responder) = established_pair();
        let combined = initiator.encrypt(b"once").unwrap();

        assert!(responder.decrypt(&combined).is_ok());
        assert_eq!(
            responder.decrypt(&combined),
            Err(NoiseError::DecryptionFailed)
        );
    }

    #[test]
    fn test_out_of_order_within_window() {
        let (mut initiator, mut responder) = established_pair();
        let first = initiator.encrypt(b"0").unwrap();
        let second = initiator.encrypt(b"1").unwrap();
        let third = initiator.encrypt(b"2").unwrap();

        assert_eq!(responder.decrypt(&first).unwrap(), b"0");
        assert_eq!(responder.decrypt(&third).unwrap(), b"2");
        // Delivered late but unseen and inside the window
        assert_eq!(responder.decrypt(&second).unwrap(), b"1");
    }

    #[test]
    fn test_tampering_fails_without_killing_session() {
        let (mut initiator, mut responder) = established_pair();

        let mut tampered = initiator.encrypt(b"secret").unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert_eq!(
            responder.decrypt(&tampered),
            Err(NoiseError::DecryptionFailed)
        );

        // A single bad packet must not kill an otherwise-healthy session,
        // and the failed attempt must not have poisoned the replay window.
        let clean = initiator.encrypt(b"follow-up").unwrap();
        assert_eq!(responder.decrypt(&clean).unwrap(), b"follow-up");
        assert!(responder.is_established());
    }

    #[test]
    fn test_wrong_size_message_fails_session() {
        let (mut initiator, mut responder) = session_pair();
        let message_1 = initiator.start_handshake().unwrap();
        responder.process_handshake_message(&message_1).unwrap();

        let result = responder.process_handshake_message(&[0u8; 47]);
        assert!(matches!(
            result,
            Err(NoiseError::MessageSize {
                expected: XX_MESSAGE_3_SIZE,
                got: 47
            })
        ));
        assert!(matches!(responder.state(), SessionState::Failed(_)));
    }

    #[test]
    fn test_garbage_message_2_fails_initiator() {
        let (mut initiator, _responder) = session_pair();
        initiator.start_handshake().unwrap();

        let result = initiator.process_handshake_message(&[0xAB; XX_MESSAGE_2_SIZE]);
        assert_eq!(result, Err(NoiseError::HandshakeFailed));
        assert!(matches!(initiator.state(), SessionState::Failed(_)));
    }

    #[test]
    fn test_double_start_is_invalid_state() {
        let (mut initiator, _) = session_pair();
        initiator.start_handshake().unwrap();
        assert!(matches!(
            initiator.start_handshake(),
            Err(NoiseError::InvalidState(_))
        ));
    }

    #[test]
    fn test_responder_cannot_start() {
        let (_, mut responder) = session_pair();
        assert!(matches!(
            responder.start_handshake(),
            Err(NoiseError::InvalidState(_))
        ));
    }

    #[test]
    fn test_encrypt_requires_established() {
        let (mut initiator, _) = session_pair();
        assert!(matches!(
            initiator.encrypt(b"too early"),
            Err(NoiseError::InvalidState(_))
        ));
    }

    #[test]
    fn test_responder_handles_peer_restart() {
        let (mut initiator, mut responder) = session_pair();
        let message_1 = initiator.start_handshake().unwrap();
        responder.process_handshake_message(&message_1).unwrap();

        // Initiator restarts from scratch; responder must follow
        let mut initiator = NoiseSession::new(
            "responder",
            true,
            StaticSecret::random_from_rng(OsRng),
        );
        let message_1 = initiator.start_handshake().unwrap();
        let message_2 = responder
            .process_handshake_message(&message_1)
            .unwrap()
            .unwrap();
        let message_3 = initiator
            .process_handshake_message(&message_2)
            .unwrap()
            .unwrap();
        responder.process_handshake_message(&message_3).unwrap();

        assert!(initiator.is_established());
        assert!(responder.is_established());
    }

    #[test]
    fn test_reset_allows_fresh_handshake() {
        let (mut initiator, mut responder) = established_pair();

        initiator.reset();
        responder.reset();
        assert_eq!(*initiator.state(), SessionState::Uninitialized);

        let message_1 = initiator.start_handshake().unwrap();
        let message_2 = responder
            .process_handshake_message(&message_1)
            .unwrap()
            .unwrap();
        let message_3 = initiator
            .process_handshake_message(&message_2)
            .unwrap()
            .unwrap();
        responder.process_handshake_message(&message_3).unwrap();
        assert!(initiator.is_established() && responder.is_established());
    }

    #[test]
    fn test_destroy_is_terminal() {
        let (mut initiator, _) = established_pair();
        initiator.destroy();

        assert!(matches!(initiator.state(), SessionState::Failed(_)));
        assert_eq!(initiator.encrypt(b"x"), Err(NoiseError::Destroyed));
        assert_eq!(initiator.decrypt(&[0u8; 32]), Err(NoiseError::Destroyed));
        assert!(matches!(
            initiator.start_handshake(),
            Err(NoiseError::Destroyed)
        ));

        // reset cannot revive a destroyed session
        initiator.reset();
        assert!(matches!(initiator.state(), SessionState::Failed(_)));
    }

    #[test]
    fn test_fresh_session_needs_no_rekey() {
        let (initiator, _) = established_pair();
        assert!(!initiator.needs_rekey());
    }
}
