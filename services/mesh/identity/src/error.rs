//! Identity error types.

use thiserror::Error;

/// Identity and key-store errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Seed material has the wrong length
    #[error("seed must be 32 bytes, got {0}")]
    SeedLength(usize),

    /// Stored key material failed to parse
    #[error("stored key material invalid")]
    Corrupt,

    /// Key store I/O failure
    #[error("key store i/o: {0}")]
    Io(#[from] std::io::Error),
}
