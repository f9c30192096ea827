//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Packet shorter than the minimum header
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Unknown packet type; droppable, not fatal to the pipeline
    #[error("unknown type 0x{0:02x}")]
    UnknownType(u8),

    /// Declared lengths point past the end of the buffer
    #[error("truncated packet")]
    Truncated,

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Compressed payload failed to decompress
    #[error("compressed payload invalid")]
    Compression,

    /// TLV field longer than the 255-byte length field allows
    #[error("tlv field exceeds 255 bytes")]
    TlvOversize,
}
