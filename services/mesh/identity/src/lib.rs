//! Identity key derivation, signing, and key persistence for the ember mesh.
//!
//! One 32-byte master seed deterministically yields both halves of a peer's
//! identity: an Ed25519 signing keypair for packet authentication and an
//! X25519 static keypair for the Noise layer. The first 16 hex characters of
//! the X25519 public key are the peer ID used across the whole stack, so the
//! ID a peer advertises is exactly the fingerprint its Noise handshakes prove.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod store;

pub use error::IdentityError;
pub use keys::{verify, Identity, FINGERPRINT_HEX_CHARS, SEED_SIZE};
pub use store::{load_or_create_identity, FileKeyStore, KeyStore, MemoryKeyStore};
