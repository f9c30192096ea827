//! Optional payload compression.
//!
//! Payloads above a size threshold are raw-deflate compressed when that
//! actually helps. Peers on some platforms emit zlib-wrapped streams instead
//! of raw deflate, so decompression tries raw deflate first and falls back to
//! zlib.

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Minimum payload size worth compressing, in bytes.
pub const COMPRESSION_THRESHOLD: usize = 200;

/// Heuristic: skip data that is probably compressed already.
///
/// High byte diversity means deflate is unlikely to gain anything.
pub fn should_compress(data: &[u8]) -> bool {
    if data.len() < COMPRESSION_THRESHOLD {
        return false;
    }

    let mut seen = [false; 256];
    let mut unique = 0usize;
    for &byte in data {
        if !seen[byte as usize] {
            seen[byte as usize] = true;
            unique += 1;
        }
    }

    let unique_ratio = unique as f64 / data.len().min(256) as f64;
    unique_ratio < 0.9
}

/// Compress `data` with raw deflate.
///
/// Returns `None` when the input is below `min_bytes`, looks already
/// compressed, or the compressed form is not strictly smaller than the input.
pub fn compress(data: &[u8], min_bytes: usize) -> Option<Vec<u8>> {
    if data.len() < min_bytes || !should_compress(data) {
        return None;
    }

    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data).ok()?;
    let compressed = encoder.finish().ok()?;

    if !compressed.is_empty() && compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompress `data`, trying raw deflate first and zlib-wrapped second.
///
/// `original_size` is a hint used for buffer sizing and verification; a
/// stream decoding to a different non-zero length is still accepted. Corrupt
/// streams yield `None`, never an error or panic.
pub fn decompress(data: &[u8], original_size: usize) -> Option<Vec<u8>> {
    if let Some(out) = inflate_raw(data, original_size) {
        return Some(out);
    }
    inflate_zlib(data, original_size)
}

fn inflate_raw(data: &[u8], original_size: usize) -> Option<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::with_capacity(original_size);
    decoder.read_to_end(&mut out).ok()?;
    if out.is_empty() {
        return None;
    }
    Some(out)
}

fn inflate_zlib(data: &[u8], original_size: usize) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(original_size);
    decoder.read_to_end(&mut out).ok()?;
    if out.is_empty() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;

    #[test]
    fn test_small_input_not_compressed() {
        assert!(compress(b"tiny", COMPRESSION_THRESHOLD).is_none());
    }

    #[test]
    fn test_incompressible_input_not_shipped() {
        // Pseudo-random bytes: every value distinct enough that deflate loses
        let data: Vec<u8> = (0..1024u32)
            .flat_map(|i| i.wrapping_mul(2_654_435_761).to_be_bytes())
            .collect();
        assert!(compress(&data, COMPRESSION_THRESHOLD).is_none());
    }

    #[test]
    fn test_roundtrip() {
        let data = vec![0x41u8; 2048];
        let compressed = compress(&data, COMPRESSION_THRESHOLD).unwrap();
        assert!(compressed.len() < data.len());

        let restored = decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_zlib_wrapped_fallback() {
        let data = vec![0x42u8; 1024];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let zlib_stream = encoder.finish().unwrap();

        let restored = decompress(&zlib_stream, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_corrupt_stream_returns_none() {
        assert!(decompress(&[0xDE, 0xAD, 0xBE, 0xEF], 128).is_none());
    }
}
