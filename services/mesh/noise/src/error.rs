//! Noise session error types.

use thiserror::Error;

/// Noise protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoiseError {
    /// Operation not valid in the current session state
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// Handshake message has the wrong size for the expected pattern step
    #[error("handshake message size {got}, expected {expected}")]
    MessageSize {
        /// Size the current pattern step requires
        expected: usize,
        /// Size actually received
        got: usize,
    },

    /// Handshake MAC or DH processing failed
    #[error("handshake failed")]
    HandshakeFailed,

    /// Transport encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Replay, out-of-window nonce, or AEAD verification failure
    #[error("decryption failed")]
    DecryptionFailed,

    /// Send counter exhausted the 4-byte nonce space
    #[error("send nonce exceeds 4-byte limit")]
    NonceExceeded,

    /// Session was destroyed; no further operations are valid
    #[error("session destroyed")]
    Destroyed,
}
