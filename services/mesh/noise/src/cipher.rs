//! AEAD and symmetric-state primitives for the XX handshake.
//!
//! These follow the Noise specification's `CipherState` / `SymmetricState`
//! objects over ChaCha20-Poly1305 and SHA-256. AEAD nonces are the Noise
//! convention: four zero bytes followed by the 64-bit counter, little-endian.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::NoiseError;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// SHA-256 output size in bytes.
pub const HASH_SIZE: usize = 32;

fn aead_nonce(counter: u64) -> Nonce {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    Nonce::from(nonce)
}

/// One AEAD key plus its nonce counter.
pub struct CipherState {
    key: Option<[u8; KEY_SIZE]>,
    nonce: u64,
}

impl CipherState {
    pub(crate) fn new() -> Self {
        Self {
            key: None,
            nonce: 0,
        }
    }

    pub(crate) fn initialize_key(&mut self, key: [u8; KEY_SIZE]) {
        if let Some(ref mut old) = self.key {
            old.zeroize();
        }
        self.key = Some(key);
        self.nonce = 0;
    }

    pub(crate) fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt at the current counter, then advance it.
    pub(crate) fn encrypt_with_ad(
        &mut self,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = self.encrypt_at(self.nonce, ad, plaintext)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt at the current counter, advancing it only on success.
    pub(crate) fn decrypt_with_ad(
        &mut self,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let plaintext = self.decrypt_at(self.nonce, ad, ciphertext)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    /// Encrypt at an explicit counter without touching internal state.
    pub(crate) fn encrypt_at(
        &self,
        counter: u64,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let key = self.key.as_ref().ok_or(NoiseError::EncryptionFailed)?;
        let cipher = ChaCha20Poly1305::new(key.into());
        cipher
            .encrypt(
                &aead_nonce(counter),
                Payload {
                    msg: plaintext,
                    aad: ad,
                },
            )
            .map_err(|_| NoiseError::EncryptionFailed)
    }

    /// Decrypt at an explicit counter without touching internal state.
    pub(crate) fn decrypt_at(
        &self,
        counter: u64,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let key = self.key.as_ref().ok_or(NoiseError::DecryptionFailed)?;
        let cipher = ChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(
                &aead_nonce(counter),
                Payload {
                    msg: ciphertext,
                    aad: ad,
                },
            )
            .map_err(|_| NoiseError::DecryptionFailed)
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.key {
            key.zeroize();
        }
    }
}

/// Chaining key, transcript hash, and the in-handshake cipher.
pub struct SymmetricState {
    ck: [u8; HASH_SIZE],
    h: [u8; HASH_SIZE],
    cipher: CipherState,
}

impl SymmetricState {
    /// Initialize from a protocol name (32 bytes or fewer used directly,
    /// longer names hashed first, per the Noise spec).
    pub(crate) fn initialize(protocol_name: &[u8]) -> Self {
        let mut h = [0u8; HASH_SIZE];
        if protocol_name.len() <= HASH_SIZE {
            h[..protocol_name.len()].copy_from_slice(protocol_name);
        } else {
            h = Sha256::digest(protocol_name).into();
        }

        Self {
            ck: h,
            h,
            cipher: CipherState::new(),
        }
    }

    pub(crate) fn mix_hash(&mut self, data: &[u8]) {
        self.h = Sha256::new()
            .chain_update(self.h)
            .chain_update(data)
            .finalize()
            .into();
    }

    pub(crate) fn mix_key(&mut self, input_key_material: &[u8]) {
        let mut okm = [0u8; HASH_SIZE * 2];
        Hkdf::<Sha256>::new(Some(&self.ck), input_key_material)
            .expand(&[], &mut okm)
            .expect("hkdf output length is valid");

        self.ck.copy_from_slice(&okm[..HASH_SIZE]);
        let mut temp_key = [0u8; KEY_SIZE];
        temp_key.copy_from_slice(&okm[HASH_SIZE..]);
        self.cipher.initialize_key(temp_key);
        okm.zeroize();
    }

    pub(crate) fn has_key(&self) -> bool {
        self.cipher.has_key()
    }

    pub(crate) fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = self.cipher.encrypt_with_ad(&self.h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    pub(crate) fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let plaintext = self.cipher.decrypt_with_ad(&self.h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the two transport keys. The initiator sends on the first.
    pub(crate) fn split(&self) -> (CipherState, CipherState) {
        let mut okm = [0u8; KEY_SIZE * 2];
        Hkdf::<Sha256>::new(Some(&self.ck), &[])
            .expand(&[], &mut okm)
            .expect("hkdf output length is valid");

        let mut k1 = [0u8; KEY_SIZE];
        let mut k2 = [0u8; KEY_SIZE];
        k1.copy_from_slice(&okm[..KEY_SIZE]);
        k2.copy_from_slice(&okm[KEY_SIZE..]);
        okm.zeroize();

        let mut sender = CipherState::new();
        sender.initialize_key(k1);
        let mut receiver = CipherState::new();
        receiver.initialize_key(k2);
        (sender, receiver)
    }

    /// Final transcript hash for channel binding.
    pub(crate) fn handshake_hash(&self) -> [u8; HASH_SIZE] {
        self.h
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        // h is a public transcript hash; cipher zeroizes itself
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_roundtrip() {
        let mut sender = CipherState::new();
        sender.initialize_key([7u8; KEY_SIZE]);
        let mut receiver = CipherState::new();
        receiver.initialize_key([7u8; KEY_SIZE]);

        let ciphertext = sender.encrypt_with_ad(b"ad", b"payload").unwrap();
        assert_eq!(ciphertext.len(), b"payload".len() + TAG_SIZE);
        assert_eq!(
            receiver.decrypt_with_ad(b"ad", &ciphertext).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_cipher_rejects_wrong_ad() {
        let mut cipher = CipherState::new();
        cipher.initialize_key([7u8; KEY_SIZE]);
        let ciphertext = cipher.encrypt_at(0, b"ad", b"payload").unwrap();
        assert_eq!(
            cipher.decrypt_at(0, b"other", &ciphertext),
            Err(NoiseError::DecryptionFailed)
        );
    }

    #[test]
    fn test_cipher_nonce_separates_messages() {
        let mut cipher = CipherState::new();
        cipher.initialize_key([7u8; KEY_SIZE]);
        let at_zero = cipher.encrypt_at(0, b"", b"payload").unwrap();
        let at_one = cipher.encrypt_at(1, b"", b"payload").unwrap();
        assert_ne!(at_zero, at_one);
    }

    #[test]
    fn test_symmetric_state_diverges_on_different_input() {
        let mut a = SymmetricState::initialize(b"Noise_XX_25519_ChaChaPoly_SHA256");
        let mut b = SymmetricState::initialize(b"Noise_XX_25519_ChaChaPoly_SHA256");
        assert_eq!(a.handshake_hash(), b.handshake_hash());

        a.mix_hash(b"one");
        b.mix_hash(b"two");
        assert_ne!(a.handshake_hash(), b.handshake_hash());
    }

    #[test]
    fn test_split_keys_differ() {
        let mut state = SymmetricState::initialize(b"Noise_XX_25519_ChaChaPoly_SHA256");
        state.mix_key(b"some shared secret material.....");
        let (sender, receiver) = state.split();

        let from_sender = sender.encrypt_at(0, b"", b"x").unwrap();
        let from_receiver = receiver.encrypt_at(0, b"", b"x").unwrap();
        assert_ne!(from_sender, from_receiver);
    }
}
