//! Fragmentation and reassembly for packets above the transport MTU.
//!
//! Fragments buffer per (sender, fragment ID) until the final fragment
//! arrives. Partial buffers are discarded after a timeout, and the number of
//! concurrent reassemblies is capped with oldest-first eviction so a hostile
//! peer cannot grow memory without bound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Encoded packets above this size are fragmented.
pub const FRAGMENT_THRESHOLD: usize = 512;

/// Payload bytes per fragment, leaving headroom for the fragment header.
pub const MAX_FRAGMENT_SIZE: usize = 469;

/// Partial reassemblies older than this are discarded.
const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum concurrent reassemblies before oldest-first eviction.
const MAX_CONCURRENT_REASSEMBLIES: usize = 64;

struct ReassemblyBuffer {
    fragments: Vec<Vec<u8>>,
    created_at: Instant,
}

/// Splits outgoing packets and reassembles incoming fragments.
pub struct FragmentManager {
    buffers: Mutex<HashMap<String, ReassemblyBuffer>>,
}

impl FragmentManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an encoded packet of `encoded_len` bytes needs fragmenting.
    pub fn needs_fragmentation(encoded_len: usize) -> bool {
        encoded_len > FRAGMENT_THRESHOLD
    }

    /// Split encoded packet bytes into fragment payloads, in order.
    pub fn split(data: &[u8]) -> Vec<Vec<u8>> {
        if data.len() <= FRAGMENT_THRESHOLD {
            return vec![data.to_vec()];
        }

        data.chunks(MAX_FRAGMENT_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Buffer one fragment for `(peer_id, fragment_id)`.
    ///
    /// Returns the reassembled bytes once `is_last` arrives; fragments for
    /// one ID must be delivered in order (guaranteed by per-peer FIFO).
    pub fn add_fragment(
        &self,
        peer_id: &str,
        fragment_id: &str,
        data: &[u8],
        is_last: bool,
    ) -> Option<Vec<u8>> {
        let key = format!("{peer_id}:{fragment_id}");
        let mut buffers = self.buffers.lock().expect("fragment lock");

        if !buffers.contains_key(&key) && buffers.len() >= MAX_CONCURRENT_REASSEMBLIES {
            evict_oldest(&mut buffers);
        }

        let buffer = buffers.entry(key.clone()).or_insert_with(|| ReassemblyBuffer {
            fragments: Vec::new(),
            created_at: Instant::now(),
        });
        buffer.fragments.push(data.to_vec());

        if !is_last {
            return None;
        }

        let buffer = buffers.remove(&key).expect("buffer just inserted");
        let total: usize = buffer.fragments.iter().map(|f| f.len()).sum();
        let mut reassembled = Vec::with_capacity(total);
        for fragment in buffer.fragments {
            reassembled.extend_from_slice(&fragment);
        }

        debug!(
            "Reassembled {} bytes from {} for fragment {}",
            reassembled.len(),
            peer_id,
            fragment_id
        );
        Some(reassembled)
    }

    /// Discard partial reassemblies past the timeout.
    pub fn sweep_expired(&self) {
        let mut buffers = self.buffers.lock().expect("fragment lock");
        let before = buffers.len();
        buffers.retain(|_, buffer| buffer.created_at.elapsed() <= FRAGMENT_TIMEOUT);

        let dropped = before - buffers.len();
        if dropped > 0 {
            warn!("Discarded {} expired fragment reassemblies", dropped);
        }
    }

    /// Drop all partial state.
    pub fn clear(&self) {
        self.buffers.lock().expect("fragment lock").clear();
    }
}

impl Default for FragmentManager {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_oldest(buffers: &mut HashMap<String, ReassemblyBuffer>) {
    let oldest = buffers
        .iter()
        .min_by_key(|(_, buffer)| buffer.created_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        warn!("Fragment buffer cap reached, evicting {}", key);
        buffers.remove(&key);
    }
}
