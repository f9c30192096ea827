//! Packet encoding and decoding.
//!
//! The header layout is fixed: version, type, ttl, timestamp (8, big-endian),
//! flags, payload length (2 bytes for v1, 4 bytes for v2+). Flags are derived
//! from field presence at encode time, never set by callers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::compress;
use crate::error::WireError;
use crate::packet::{Flags, MessageType, Packet, PEER_ID_SIZE, SIGNATURE_SIZE};
use crate::padding;

/// v1 header size: version + type + ttl + timestamp(8) + flags + payload_len(2)
pub const HEADER_SIZE_V1: usize = 14;
/// v2 header size: as v1 with a 4-byte payload length
pub const HEADER_SIZE_V2: usize = 16;

/// Authoritative wire version for new traffic.
pub const WIRE_VERSION: u8 = 1;
/// Extended version used when a payload exceeds the v1 2-byte length field.
pub const WIRE_VERSION_V2: u8 = 2;

fn header_size(version: u8) -> usize {
    if version >= WIRE_VERSION_V2 {
        HEADER_SIZE_V2
    } else {
        HEADER_SIZE_V1
    }
}

/// Encode a packet into padded wire bytes.
///
/// Payloads above the compression threshold are deflate-compressed when that
/// actually shrinks them; the wire form then carries a 2-byte original size in
/// front of the compressed bytes. The encoded packet is padded to the next
/// standard block size.
pub fn encode(packet: &Packet) -> Result<Bytes, WireError> {
    let mut payload: &[u8] = &packet.payload;
    let compressed_payload;
    let mut original_size: Option<u16> = None;

    // The compression prefix only carries a 2-byte original size, so larger
    // payloads go out uncompressed.
    if packet.payload.len() <= u16::MAX as usize {
        if let Some(compressed) =
            compress::compress(&packet.payload, compress::COMPRESSION_THRESHOLD)
        {
            original_size = Some(packet.payload.len() as u16);
            compressed_payload = compressed;
            payload = &compressed_payload;
        }
    }

    let payload_data_size = payload.len() + if original_size.is_some() { 2 } else { 0 };
    if packet.version < WIRE_VERSION_V2 && payload_data_size > u16::MAX as usize {
        return Err(WireError::Size(payload_data_size));
    }

    let mut flags = Flags::empty();
    if packet.recipient_id.is_some() {
        flags |= Flags::HAS_RECIPIENT;
    }
    if packet.signature.is_some() {
        flags |= Flags::HAS_SIGNATURE;
    }
    if original_size.is_some() {
        flags |= Flags::IS_COMPRESSED;
    }

    let capacity = header_size(packet.version)
        + PEER_ID_SIZE
        + if packet.recipient_id.is_some() { PEER_ID_SIZE } else { 0 }
        + payload_data_size
        + if packet.signature.is_some() { SIGNATURE_SIZE } else { 0 };
    let mut buf = BytesMut::with_capacity(capacity);

    buf.put_u8(packet.version);
    buf.put_u8(packet.packet_type as u8);
    buf.put_u8(packet.ttl);
    buf.put_u64(packet.timestamp);
    buf.put_u8(flags.bits());

    if packet.version >= WIRE_VERSION_V2 {
        buf.put_u32(payload_data_size as u32);
    } else {
        buf.put_u16(payload_data_size as u16);
    }

    buf.put_slice(&packet.sender_id);

    if let Some(ref recipient) = packet.recipient_id {
        buf.put_slice(recipient);
    }

    if let Some(size) = original_size {
        buf.put_u16(size);
    }
    buf.put_slice(payload);

    if let Some(ref signature) = packet.signature {
        buf.put_slice(signature);
    }

    // Pad to a standard block size for traffic analysis resistance
    let target = padding::optimal_block_size(buf.len());
    Ok(Bytes::from(padding::pad(&buf, target)))
}

/// Decode a packet from wire bytes.
///
/// Tries the raw bytes first (robust when no padding was applied), then
/// retries after stripping padding.
pub fn decode(data: &[u8]) -> Result<Packet, WireError> {
    match decode_core(data) {
        Ok(packet) => Ok(packet),
        Err(first_err) => {
            let unpadded = padding::unpad(data);
            if unpadded.len() == data.len() {
                return Err(first_err); // no padding to remove, already failed
            }
            decode_core(unpadded)
        }
    }
}

fn decode_core(raw: &[u8]) -> Result<Packet, WireError> {
    if raw.len() < HEADER_SIZE_V1 + PEER_ID_SIZE {
        return Err(WireError::TooShort(raw.len()));
    }

    let mut offset = 0;

    let version = raw[offset];
    offset += 1;
    if version != WIRE_VERSION && version != WIRE_VERSION_V2 {
        return Err(WireError::Version(version));
    }

    let packet_type = MessageType::try_from(raw[offset])?;
    offset += 1;

    let ttl = raw[offset];
    offset += 1;

    let timestamp = u64::from_be_bytes(
        raw[offset..offset + 8]
            .try_into()
            .map_err(|_| WireError::Truncated)?,
    );
    offset += 8;

    let flags = Flags::from_bits_truncate(raw[offset]);
    offset += 1;

    let payload_length = if version >= WIRE_VERSION_V2 {
        if raw.len() < offset + 4 {
            return Err(WireError::Truncated);
        }
        let len = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        len
    } else {
        let len = u16::from_be_bytes(raw[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        len
    };

    let mut expected = header_size(version) + PEER_ID_SIZE + payload_length;
    if flags.contains(Flags::HAS_RECIPIENT) {
        expected += PEER_ID_SIZE;
    }
    if flags.contains(Flags::HAS_SIGNATURE) {
        expected += SIGNATURE_SIZE;
    }
    if raw.len() < expected {
        return Err(WireError::Truncated);
    }

    let mut sender_id = [0u8; PEER_ID_SIZE];
    sender_id.copy_from_slice(&raw[offset..offset + PEER_ID_SIZE]);
    offset += PEER_ID_SIZE;

    let recipient_id = if flags.contains(Flags::HAS_RECIPIENT) {
        let mut id = [0u8; PEER_ID_SIZE];
        id.copy_from_slice(&raw[offset..offset + PEER_ID_SIZE]);
        offset += PEER_ID_SIZE;
        Some(id)
    } else {
        None
    };

    let payload = if flags.contains(Flags::IS_COMPRESSED) {
        // First 2 bytes of the payload section are the original size
        if payload_length < 2 {
            return Err(WireError::Compression);
        }
        let original_size = u16::from_be_bytes(raw[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;

        let compressed = &raw[offset..offset + payload_length - 2];
        offset += payload_length - 2;

        compress::decompress(compressed, original_size).ok_or(WireError::Compression)?
    } else {
        let payload = raw[offset..offset + payload_length].to_vec();
        offset += payload_length;
        payload
    };

    let signature = if flags.contains(Flags::HAS_SIGNATURE) {
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&raw[offset..offset + SIGNATURE_SIZE]);
        Some(sig)
    } else {
        None
    };

    Ok(Packet {
        version,
        packet_type,
        ttl,
        timestamp,
        sender_id,
        recipient_id,
        payload,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::BROADCAST_RECIPIENT;

    fn sample_packet() -> Packet {
        Packet {
            version: WIRE_VERSION,
            packet_type: MessageType::Message,
            ttl: 3,
            timestamp: 1_700_000_000_123,
            sender_id: [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18],
            recipient_id: None,
            payload: b"hello mesh".to_vec(),
            signature: None,
        }
    }

    #[test]
    fn test_roundtrip_minimal() {
        let packet = sample_packet();
        let wire = encode(&packet).unwrap();
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_roundtrip_all_fields() {
        let mut packet = sample_packet();
        packet.recipient_id = Some([9u8; PEER_ID_SIZE]);
        packet.signature = Some([0x42; SIGNATURE_SIZE]);

        let wire = encode(&packet).unwrap();
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_roundtrip_broadcast_recipient() {
        let mut packet = sample_packet();
        packet.recipient_id = Some(BROADCAST_RECIPIENT);

        let decoded = decode(&encode(&packet).unwrap()).unwrap();
        assert_eq!(decoded.recipient_id, Some(BROADCAST_RECIPIENT));
        assert!(decoded.is_broadcast());
    }

    #[test]
    fn test_roundtrip_compressible_payload() {
        let mut packet = sample_packet();
        packet.payload = vec![0x55; 4096]; // trivially compressible

        let wire = encode(&packet).unwrap();
        // Wire form must be smaller than the raw payload plus header
        assert!(wire.len() < 4096);

        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn test_roundtrip_v2_large_payload() {
        let mut packet = sample_packet();
        packet.version = WIRE_VERSION_V2;
        // Incompressible payload above the v1 length limit
        packet.payload = (0..100_000u32)
            .flat_map(|i| i.wrapping_mul(2_654_435_761).to_be_bytes())
            .collect();

        let decoded = decode(&encode(&packet).unwrap()).unwrap();
        assert_eq!(decoded.version, WIRE_VERSION_V2);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn test_v1_oversize_payload_rejected() {
        let mut packet = sample_packet();
        // Incompressible payload the v1 2-byte length field cannot carry
        packet.payload = (0..30_000u32)
            .flat_map(|i| i.wrapping_mul(2_654_435_761).to_be_bytes())
            .collect();

        assert!(matches!(encode(&packet), Err(WireError::Size(_))));
    }

    #[test]
    fn test_rejects_short_input() {
        assert!(matches!(decode(&[0u8; 4]), Err(WireError::TooShort(4))));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut wire = encode(&sample_packet()).unwrap().to_vec();
        wire[0] = 9;
        assert!(matches!(decode(&wire), Err(WireError::Version(9))));
    }

    #[test]
    fn test_unknown_type_is_droppable() {
        let mut wire = encode(&sample_packet()).unwrap().to_vec();
        wire[1] = 0xEE;
        assert!(matches!(decode(&wire), Err(WireError::UnknownType(0xEE))));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let packet = sample_packet();
        let wire = encode(&packet).unwrap();
        // Slice off the padding and part of the payload
        let cut = HEADER_SIZE_V1 + PEER_ID_SIZE + 2;
        assert!(decode(&wire[..cut]).is_err());
    }

    #[test]
    fn test_decode_never_panics_on_corrupt_input() {
        let wire = encode(&sample_packet()).unwrap();
        for i in 0..wire.len() {
            let mut corrupt = wire.to_vec();
            corrupt[i] ^= 0xFF;
            let _ = decode(&corrupt); // must not panic, result irrelevant
        }
        for len in 0..wire.len() {
            let _ = decode(&wire[..len]);
        }
    }
}
