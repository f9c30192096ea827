//! Basic usage example for the mesh wire protocol.

use mesh_wire::{IdentityAnnouncement, MessageType, Packet};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Wire Protocol Example ===\n");

    // 1. Encode a broadcast chat message
    println!("1. Encoding a broadcast message...");
    let packet = Packet::new(
        MessageType::Message,
        3, // ttl
        "a1b2c3d4e5f60718",
        b"Hello, mesh network!".to_vec(),
    );
    let wire = packet.to_wire()?;
    println!("   Encoded packet size: {} bytes (padded)", wire.len());

    // 2. Decode it back
    println!("\n2. Decoding the packet...");
    let decoded = mesh_wire::decode(&wire)?;
    println!(
        "   type={:?} ttl={} sender={} payload={:?}",
        decoded.packet_type,
        decoded.ttl,
        decoded.sender_hex(),
        String::from_utf8_lossy(&decoded.payload),
    );

    // 3. An identity announcement in TLV form
    println!("\n3. Encoding an identity announcement...");
    let announcement = IdentityAnnouncement {
        nickname: "river".to_string(),
        noise_public_key: vec![0x11; 32],
        signing_public_key: vec![0x22; 32],
    };
    let tlv = announcement.encode()?;
    println!("   TLV size: {} bytes", tlv.len());

    let parsed = IdentityAnnouncement::decode(&tlv).expect("announcement decodes");
    println!("   Parsed nickname: {}", parsed.nickname);

    Ok(())
}
