//! Noise XX handshake, transport encryption, and replay protection for the
//! ember mesh.
//!
//! Implements `Noise_XX_25519_ChaChaPoly_SHA256` as a per-peer session state
//! machine. The XX pattern runs in three messages with fixed sizes (32, 96,
//! and 48 bytes) validated before any parsing. Established sessions carry a
//! 4-byte big-endian counter nonce in front of every ciphertext and defend
//! against replays with a 1024-bit sliding window.
//!
//! No key material ever leaves this crate in logs; everything is zeroized on
//! session destruction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod error;
pub mod replay;
pub mod session;

pub use error::NoiseError;
pub use replay::{ReplayWindow, REPLAY_WINDOW_BYTES, REPLAY_WINDOW_SIZE};
pub use session::{
    NoiseSession, SessionState, HIGH_NONCE_WARNING_THRESHOLD, NONCE_SIZE, PROTOCOL_NAME,
    REKEY_MESSAGE_LIMIT, REKEY_TIME_LIMIT, XX_MESSAGE_1_SIZE, XX_MESSAGE_2_SIZE, XX_MESSAGE_3_SIZE,
};
