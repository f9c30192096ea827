//! Binary packet codec, identity TLV, compression, and padding for the ember mesh.
//!
//! This crate provides the low-level wire protocol implementation for the mesh
//! network: the fixed packet header, the TLV sub-encoding used by identity
//! announcements and private-message payloads, the optional raw-deflate payload
//! compression, and the traffic-analysis padding applied to encoded packets.
//!
//! ## Wire Format
//!
//! ```text
//! +---------------------+-------------------------------------+
//! | version (1)         | 1 = 2-byte payload length           |
//! |                     | 2 = 4-byte payload length           |
//! +---------------------+-------------------------------------+
//! | type (1)            | MessageType                         |
//! +---------------------+-------------------------------------+
//! | ttl (1)             | hop budget, decremented on relay    |
//! +---------------------+-------------------------------------+
//! | timestamp (8)       | ms since epoch, big-endian          |
//! +---------------------+-------------------------------------+
//! | flags (1)           | recipient / signature / compressed  |
//! +---------------------+-------------------------------------+
//! | payload_len (2 | 4) | big-endian                          |
//! +---------------------+-------------------------------------+
//! | sender_id (8)       | fixed                               |
//! +---------------------+-------------------------------------+
//! | recipient_id (8)    | if HAS_RECIPIENT                    |
//! +---------------------+-------------------------------------+
//! | payload (variable)  | original size (2) + deflate bytes   |
//! |                     | when IS_COMPRESSED                  |
//! +---------------------+-------------------------------------+
//! | signature (64)      | if HAS_SIGNATURE (Ed25519)          |
//! +---------------------+-------------------------------------+
//! ```
//!
//! Encoded packets are padded to the next standard block size; the decoder
//! transparently strips the padding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binary;
pub mod compress;
pub mod error;
pub mod packet;
pub mod padding;
pub mod tlv;

// Re-export main types
pub use binary::{decode, encode, HEADER_SIZE_V1, HEADER_SIZE_V2, WIRE_VERSION, WIRE_VERSION_V2};
pub use compress::{compress, decompress, should_compress, COMPRESSION_THRESHOLD};
pub use error::WireError;
pub use packet::{
    peer_id_from_bytes, peer_id_to_bytes, Flags, MessageType, Packet, BROADCAST_RECIPIENT,
    PEER_ID_SIZE, SIGNATURE_SIZE,
};
pub use tlv::{IdentityAnnouncement, NoisePayload, NoisePayloadType, PrivateMessage};
