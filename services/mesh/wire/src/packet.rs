//! The mesh packet model.
//!
//! A [`Packet`] is the unit of transmission. It is constructed locally on send
//! or decoded from raw bytes on receive, and is read-only after construction
//! except for the signature, which the signing layer attaches afterwards.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::binary;
use crate::error::WireError;

/// Sender and recipient IDs are always exactly this many bytes.
pub const PEER_ID_SIZE: usize = 8;

/// Ed25519 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Recipient ID used for broadcast packets.
pub const BROADCAST_RECIPIENT: [u8; PEER_ID_SIZE] = [0xFF; PEER_ID_SIZE];

/// Packet types as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Identity announcement (TLV payload)
    Announce = 0x01,
    /// User message, private or broadcast
    Message = 0x02,
    /// Peer departure notification
    Leave = 0x03,
    /// Noise XX handshake message
    NoiseHandshake = 0x10,
    /// Noise encrypted transport message
    NoiseEncrypted = 0x11,
    /// Fragment of a larger packet
    Fragment = 0x20,
    /// Sync request
    RequestSync = 0x21,
    /// File transfer packet
    FileTransfer = 0x22,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Announce),
            0x02 => Ok(MessageType::Message),
            0x03 => Ok(MessageType::Leave),
            0x10 => Ok(MessageType::NoiseHandshake),
            0x11 => Ok(MessageType::NoiseEncrypted),
            0x20 => Ok(MessageType::Fragment),
            0x21 => Ok(MessageType::RequestSync),
            0x22 => Ok(MessageType::FileTransfer),
            _ => Err(WireError::UnknownType(value)),
        }
    }
}

bitflags! {
    /// Packet flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// An 8-byte recipient ID follows the sender ID
        const HAS_RECIPIENT = 1 << 0;
        /// A 64-byte Ed25519 signature trails the payload
        const HAS_SIGNATURE = 1 << 1;
        /// Payload is deflate-compressed, prefixed with its original size
        const IS_COMPRESSED = 1 << 2;
    }
}

/// The unit of transmission on the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol version; 1 uses a 2-byte payload length, 2 a 4-byte one
    pub version: u8,
    /// Packet type
    pub packet_type: MessageType,
    /// Remaining hop budget
    pub ttl: u8,
    /// Milliseconds since the Unix epoch at construction
    pub timestamp: u64,
    /// Originating peer, 8 bytes truncated/padded from the hex peer ID
    pub sender_id: [u8; PEER_ID_SIZE],
    /// Target peer; `None` or [`BROADCAST_RECIPIENT`] for broadcasts
    pub recipient_id: Option<[u8; PEER_ID_SIZE]>,
    /// Application payload
    pub payload: Vec<u8>,
    /// Ed25519 signature over [`Packet::to_signable_bytes`]
    pub signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl Packet {
    /// Create a broadcast packet from a hex peer ID.
    pub fn new(packet_type: MessageType, ttl: u8, sender_id: &str, payload: Vec<u8>) -> Self {
        Self {
            version: binary::WIRE_VERSION,
            packet_type,
            ttl,
            timestamp: now_millis(),
            sender_id: peer_id_to_bytes(sender_id),
            recipient_id: None,
            payload,
            signature: None,
        }
    }

    /// Create a unicast packet addressed to `recipient_id`.
    pub fn new_directed(
        packet_type: MessageType,
        ttl: u8,
        sender_id: &str,
        recipient_id: &str,
        payload: Vec<u8>,
    ) -> Self {
        let mut packet = Self::new(packet_type, ttl, sender_id, payload);
        packet.recipient_id = Some(peer_id_to_bytes(recipient_id));
        packet
    }

    /// Whether this packet addresses every peer.
    pub fn is_broadcast(&self) -> bool {
        match self.recipient_id {
            None => true,
            Some(id) => id == BROADCAST_RECIPIENT,
        }
    }

    /// Hex form of the sender ID.
    pub fn sender_hex(&self) -> String {
        peer_id_from_bytes(&self.sender_id)
    }

    /// Encode this packet for transmission.
    pub fn to_wire(&self) -> Result<Bytes, WireError> {
        binary::encode(self)
    }

    /// Encode the packet for signing.
    ///
    /// TTL is pinned to zero and the signature omitted: TTL mutates on every
    /// relay hop, so it cannot be covered by the signature.
    pub fn to_signable_bytes(&self) -> Result<Bytes, WireError> {
        let unsigned = Packet {
            ttl: 0,
            signature: None,
            ..self.clone()
        };
        binary::encode(&unsigned)
    }
}

/// Convert a hex peer ID to its fixed 8-byte wire form, zero-padded and
/// truncated exactly as every other node does it.
pub fn peer_id_to_bytes(peer_id: &str) -> [u8; PEER_ID_SIZE] {
    let mut result = [0u8; PEER_ID_SIZE];
    let bytes = peer_id.as_bytes();
    let mut index = 0;

    while index < PEER_ID_SIZE && index * 2 + 2 <= bytes.len() {
        let pair = &peer_id[index * 2..index * 2 + 2];
        if let Ok(byte) = u8::from_str_radix(pair, 16) {
            result[index] = byte;
        }
        index += 1;
    }

    result
}

/// Hex-encode an 8-byte wire peer ID.
pub fn peer_id_from_bytes(id: &[u8; PEER_ID_SIZE]) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::try_from(0x01).unwrap(), MessageType::Announce);
        assert_eq!(
            MessageType::try_from(0x22).unwrap(),
            MessageType::FileTransfer
        );
        assert!(matches!(
            MessageType::try_from(0xEE),
            Err(WireError::UnknownType(0xEE))
        ));
    }

    #[test]
    fn test_flags() {
        let flags = Flags::HAS_RECIPIENT | Flags::HAS_SIGNATURE;
        assert!(flags.contains(Flags::HAS_RECIPIENT));
        assert!(flags.contains(Flags::HAS_SIGNATURE));
        assert!(!flags.contains(Flags::IS_COMPRESSED));
    }

    #[test]
    fn test_peer_id_roundtrip() {
        let id = peer_id_to_bytes("a1b2c3d4e5f60718");
        assert_eq!(peer_id_from_bytes(&id), "a1b2c3d4e5f60718");
    }

    #[test]
    fn test_peer_id_padding_and_truncation() {
        // Short IDs are zero-padded
        assert_eq!(
            peer_id_to_bytes("a1b2"),
            [0xa1, 0xb2, 0, 0, 0, 0, 0, 0]
        );
        // Long IDs are truncated to 8 bytes
        assert_eq!(
            peer_id_to_bytes("00112233445566778899"),
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
        );
    }

    #[test]
    fn test_broadcast_detection() {
        let mut packet = Packet::new(MessageType::Message, 3, "aabbccdd", b"hi".to_vec());
        assert!(packet.is_broadcast());

        packet.recipient_id = Some(BROADCAST_RECIPIENT);
        assert!(packet.is_broadcast());

        packet.recipient_id = Some([1u8; PEER_ID_SIZE]);
        assert!(!packet.is_broadcast());
    }

    #[test]
    fn test_signable_bytes_ignore_ttl() {
        let mut packet = Packet::new(MessageType::Announce, 5, "aabbccdd", b"payload".to_vec());
        let before = packet.to_signable_bytes().unwrap();

        packet.ttl = 2;
        packet.signature = Some([7u8; SIGNATURE_SIZE]);
        let after = packet.to_signable_bytes().unwrap();

        assert_eq!(before, after);
    }
}
