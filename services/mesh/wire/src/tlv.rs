//! TLV sub-encodings.
//!
//! Identity announcements and the payloads carried inside Noise-encrypted
//! packets use a legacy-compatible TLV format: `[type:1][length:1][value]`,
//! with a 255-byte cap per field. Encoders fail on oversized fields rather
//! than truncating; decoders skip unknown field types for forward
//! compatibility and return `None` when required fields are missing.

use crate::error::WireError;

const TLV_MAX_VALUE: usize = 255;

// IdentityAnnouncement field types
const TLV_NICKNAME: u8 = 0x01;
const TLV_NOISE_PUBLIC_KEY: u8 = 0x02;
const TLV_SIGNING_PUBLIC_KEY: u8 = 0x03;

// PrivateMessage field types
const TLV_MESSAGE_ID: u8 = 0x00;
const TLV_CONTENT: u8 = 0x01;

fn put_tlv(out: &mut Vec<u8>, tlv_type: u8, value: &[u8]) -> Result<(), WireError> {
    if value.len() > TLV_MAX_VALUE {
        return Err(WireError::TlvOversize);
    }
    out.push(tlv_type);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    Ok(())
}

/// Walk `[type][len][value]` records, calling `visit` for each. Returns false
/// when a declared length runs past the end of the input.
fn for_each_tlv<'a>(data: &'a [u8], mut visit: impl FnMut(u8, &'a [u8])) -> bool {
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let tlv_type = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;

        if offset + length > data.len() {
            return false;
        }

        visit(tlv_type, &data[offset..offset + length]);
        offset += length;
    }
    true
}

/// Identity broadcast binding a nickname to a peer's key material, so peers
/// can populate their records without a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAnnouncement {
    /// Display name claimed by the peer
    pub nickname: String,
    /// X25519 static public key used by the Noise layer
    pub noise_public_key: Vec<u8>,
    /// Ed25519 public key used to verify packet signatures
    pub signing_public_key: Vec<u8>,
}

impl IdentityAnnouncement {
    /// Encode as TLV. Fails if any field exceeds 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(
            6 + self.nickname.len() + self.noise_public_key.len() + self.signing_public_key.len(),
        );
        put_tlv(&mut out, TLV_NICKNAME, self.nickname.as_bytes())?;
        put_tlv(&mut out, TLV_NOISE_PUBLIC_KEY, &self.noise_public_key)?;
        put_tlv(&mut out, TLV_SIGNING_PUBLIC_KEY, &self.signing_public_key)?;
        Ok(out)
    }

    /// Decode from TLV. All three fields are required; unknown field types
    /// are skipped.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut nickname = None;
        let mut noise_public_key = None;
        let mut signing_public_key = None;

        let well_formed = for_each_tlv(data, |tlv_type, value| match tlv_type {
            TLV_NICKNAME => nickname = String::from_utf8(value.to_vec()).ok(),
            TLV_NOISE_PUBLIC_KEY => noise_public_key = Some(value.to_vec()),
            TLV_SIGNING_PUBLIC_KEY => signing_public_key = Some(value.to_vec()),
            _ => {} // tolerant decoder
        });

        if !well_formed {
            return None;
        }

        Some(Self {
            nickname: nickname?,
            noise_public_key: noise_public_key?,
            signing_public_key: signing_public_key?,
        })
    }
}

/// Payload types carried inside a Noise-encrypted packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoisePayloadType {
    /// Private chat message with TLV encoding
    PrivateMessage = 0x01,
    /// Message was read
    ReadReceipt = 0x02,
    /// Message was delivered
    Delivered = 0x03,
    /// File transfer
    FileTransfer = 0x20,
}

impl NoisePayloadType {
    fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PrivateMessage),
            0x02 => Some(Self::ReadReceipt),
            0x03 => Some(Self::Delivered),
            0x20 => Some(Self::FileTransfer),
            _ => None,
        }
    }
}

/// A typed payload inside the Noise transport layer: one type byte followed
/// by opaque data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoisePayload {
    /// Payload discriminant
    pub payload_type: NoisePayloadType,
    /// Inner data, interpreted per type
    pub data: Vec<u8>,
}

impl NoisePayload {
    /// Create a payload.
    pub fn new(payload_type: NoisePayloadType, data: Vec<u8>) -> Self {
        Self { payload_type, data }
    }

    /// Encode as `[type][data]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.payload_type as u8);
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode from `[type][data]`; unknown types yield `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&first, rest) = data.split_first()?;
        Some(Self {
            payload_type: NoisePayloadType::from_byte(first)?,
            data: rest.to_vec(),
        })
    }
}

/// A private chat message: message ID plus content, both TLV fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    /// Sender-assigned message ID, used by receipts
    pub message_id: String,
    /// Message text
    pub content: String,
}

impl PrivateMessage {
    /// Encode as TLV. Fails if either field exceeds 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(4 + self.message_id.len() + self.content.len());
        put_tlv(&mut out, TLV_MESSAGE_ID, self.message_id.as_bytes())?;
        put_tlv(&mut out, TLV_CONTENT, self.content.as_bytes())?;
        Ok(out)
    }

    /// Decode from TLV; both fields are required.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut message_id = None;
        let mut content = None;

        let well_formed = for_each_tlv(data, |tlv_type, value| match tlv_type {
            TLV_MESSAGE_ID => message_id = String::from_utf8(value.to_vec()).ok(),
            TLV_CONTENT => content = String::from_utf8(value.to_vec()).ok(),
            _ => {}
        });

        if !well_formed {
            return None;
        }

        Some(Self {
            message_id: message_id?,
            content: content?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_announcement() -> IdentityAnnouncement {
        IdentityAnnouncement {
            nickname: "ember".to_string(),
            noise_public_key: vec![0x11; 32],
            signing_public_key: vec![0x22; 32],
        }
    }

    #[test]
    fn test_announcement_roundtrip() {
        let announcement = sample_announcement();
        let encoded = announcement.encode().unwrap();
        assert_eq!(IdentityAnnouncement::decode(&encoded), Some(announcement));
    }

    #[test]
    fn test_announcement_oversize_fails_encoding() {
        let mut announcement = sample_announcement();
        announcement.nickname = "x".repeat(256);
        assert!(matches!(
            announcement.encode(),
            Err(WireError::TlvOversize)
        ));
    }

    #[test]
    fn test_announcement_skips_unknown_fields() {
        let mut encoded = sample_announcement().encode().unwrap();
        // Append an unknown TLV record
        encoded.extend_from_slice(&[0x7F, 0x02, 0xAA, 0xBB]);
        assert_eq!(
            IdentityAnnouncement::decode(&encoded),
            Some(sample_announcement())
        );
    }

    #[test]
    fn test_announcement_missing_field() {
        let mut out = Vec::new();
        put_tlv(&mut out, TLV_NICKNAME, b"ember").unwrap();
        assert_eq!(IdentityAnnouncement::decode(&out), None);
    }

    #[test]
    fn test_announcement_truncated_value() {
        let encoded = vec![TLV_NICKNAME, 10, b'e']; // declares 10, carries 1
        assert_eq!(IdentityAnnouncement::decode(&encoded), None);
    }

    #[test]
    fn test_noise_payload_roundtrip() {
        let payload = NoisePayload::new(NoisePayloadType::PrivateMessage, vec![1, 2, 3]);
        assert_eq!(NoisePayload::decode(&payload.encode()), Some(payload));
    }

    #[test]
    fn test_noise_payload_unknown_type() {
        assert_eq!(NoisePayload::decode(&[0x7E, 1, 2]), None);
        assert_eq!(NoisePayload::decode(&[]), None);
    }

    #[test]
    fn test_private_message_roundtrip() {
        let message = PrivateMessage {
            message_id: "A3F0".to_string(),
            content: "hello over noise".to_string(),
        };
        let encoded = message.encode().unwrap();
        assert_eq!(PrivateMessage::decode(&encoded), Some(message));
    }

    #[test]
    fn test_private_message_oversize_content() {
        let message = PrivateMessage {
            message_id: "id".to_string(),
            content: "y".repeat(300),
        };
        assert!(message.encode().is_err());
    }
}
