//! Traffic-analysis padding.
//!
//! Encoded packets are padded up to the next standard block size with
//! PKCS#7-style trailing bytes (every pad byte holds the pad length). Padding
//! is only applied when the required pad fits in a single byte; oversized
//! packets go out unpadded.

const BLOCK_SIZES: [usize; 4] = [256, 512, 1024, 2048];

/// Pick the target block size for a packet of `data_size` bytes.
///
/// A small slack is reserved so encryption overhead does not push the result
/// past the block boundary.
pub fn optimal_block_size(data_size: usize) -> usize {
    let total = data_size + 16;
    for block in BLOCK_SIZES {
        if total <= block {
            return block;
        }
    }

    data_size
}

/// Pad `data` up to `target_size`.
///
/// Returns the data unchanged when it already meets the target or the pad
/// would not fit in one byte.
pub fn pad(data: &[u8], target_size: usize) -> Vec<u8> {
    if data.len() >= target_size {
        return data.to_vec();
    }

    let padding_needed = target_size - data.len();
    if padding_needed > 255 {
        return data.to_vec();
    }

    let mut result = Vec::with_capacity(target_size);
    result.extend_from_slice(data);
    result.resize(target_size, padding_needed as u8);
    result
}

/// Strip padding, returning the original slice when no valid padding is found.
pub fn unpad(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };

    let padding_len = last as usize;
    if padding_len == 0 || padding_len > data.len() {
        return data;
    }

    let start = data.len() - padding_len;
    if data[start..].iter().any(|&b| b != last) {
        return data;
    }

    &data[..start]
}
