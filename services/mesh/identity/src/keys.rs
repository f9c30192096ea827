//! Master-seed key derivation and packet signing.

use core::fmt;

use ed25519_dalek::{Signature, Signer, Verifier, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::IdentityError;

/// Master seed length in bytes.
pub const SEED_SIZE: usize = 32;

/// Number of hex characters of the X25519 public key forming the peer ID.
pub const FINGERPRINT_HEX_CHARS: usize = 16;

/// A peer identity: Ed25519 signing keys and X25519 Noise static keys, both
/// derived from one master seed.
///
/// Key material is zeroized on drop and never printed; `Debug` shows only the
/// public fingerprint.
pub struct Identity {
    seed: [u8; SEED_SIZE],
    signing_key: SigningKey,
    noise_secret: StaticSecret,
    noise_public: PublicKey,
}

impl Identity {
    /// Derive an identity from a 32-byte master seed.
    ///
    /// The seed is the Ed25519 secret key directly; the X25519 static secret
    /// is the seed under standard Curve25519 clamping.
    pub fn from_seed(seed: &[u8]) -> Result<Self, IdentityError> {
        if seed.len() != SEED_SIZE {
            return Err(IdentityError::SeedLength(seed.len()));
        }

        let mut seed_bytes = [0u8; SEED_SIZE];
        seed_bytes.copy_from_slice(seed);

        let signing_key = SigningKey::from_bytes(&seed_bytes);

        let mut clamped = seed_bytes;
        clamped[0] &= 0xF8;
        clamped[31] &= 0x7F;
        clamped[31] |= 0x40;
        let noise_secret = StaticSecret::from(clamped);
        let noise_public = PublicKey::from(&noise_secret);
        clamped.zeroize();

        Ok(Self {
            seed: seed_bytes,
            signing_key,
            noise_secret,
            noise_public,
        })
    }

    /// Generate a fresh identity from an OS CSPRNG.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let mut seed = [0u8; SEED_SIZE];
        rng.fill_bytes(&mut seed);
        let identity = Self::from_seed(&seed).expect("seed length is fixed");
        seed.zeroize();
        identity
    }

    /// The master seed, for persistence through a [`crate::KeyStore`].
    pub fn seed(&self) -> &[u8; SEED_SIZE] {
        &self.seed
    }

    /// Peer ID: the first 16 hex characters of the X25519 public key.
    ///
    /// Other components use this interchangeably as the Noise static-key
    /// fingerprint, so it must come from the same key the handshake proves.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.noise_public.as_bytes())[..FINGERPRINT_HEX_CHARS].to_string()
    }

    /// X25519 static public key bytes for announcements and handshakes.
    pub fn noise_public_key(&self) -> [u8; 32] {
        *self.noise_public.as_bytes()
    }

    /// Clone of the X25519 static secret for a Noise session.
    pub fn noise_static_secret(&self) -> StaticSecret {
        self.noise_secret.clone()
    }

    /// Ed25519 public key bytes for announcements.
    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign arbitrary bytes with the Ed25519 signing key.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.seed.zeroize();
        // signing_key and noise_secret zeroize themselves on drop
    }
}

/// Verify an Ed25519 signature against a raw public key.
///
/// Malformed keys or signatures verify false; nothing here panics on
/// attacker-controlled input.
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let key_bytes: [u8; 32] = match public_key.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    verifying_key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = [0x5Au8; SEED_SIZE];
        let a = Identity::from_seed(&seed).unwrap();
        let b = Identity::from_seed(&seed).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.noise_public_key(), b.noise_public_key());
        assert_eq!(a.signing_public_key(), b.signing_public_key());
    }

    #[test]
    fn test_fingerprint_matches_noise_key() {
        let identity = Identity::generate(&mut OsRng);
        let expected = &hex::encode(identity.noise_public_key())[..FINGERPRINT_HEX_CHARS];
        assert_eq!(identity.fingerprint(), expected);
        assert_eq!(identity.fingerprint().len(), FINGERPRINT_HEX_CHARS);
    }

    #[test]
    fn test_bad_seed_length() {
        assert!(matches!(
            Identity::from_seed(&[0u8; 16]),
            Err(IdentityError::SeedLength(16))
        ));
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let identity = Identity::generate(&mut OsRng);
        let data = b"announce payload";
        let signature = identity.sign(data);

        assert!(verify(&identity.signing_public_key(), data, &signature));
        assert!(!verify(&identity.signing_public_key(), b"other", &signature));
    }

    #[test]
    fn test_verify_tolerates_garbage() {
        assert!(!verify(&[1, 2, 3], b"data", &[0u8; 64]));
        assert!(!verify(&[0u8; 32], b"data", &[0u8; 10]));
        assert!(!verify(&[0xFFu8; 32], b"data", &[0u8; 64]));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let identity = Identity::generate(&mut OsRng);
        let printed = format!("{identity:?}");
        assert!(printed.contains(&identity.fingerprint()));
        assert!(!printed.contains(&hex::encode(identity.seed())));
    }
}
