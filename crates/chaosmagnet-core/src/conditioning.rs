//! Centralized entropy conditioning module.
//!
//! **ALL** whitening of raw entropy lives here — no conditioning code should
//! exist in individual source implementations. Sources produce raw bytes; the
//! pool absorbs them; this module is the single, auditable gateway for turning
//! pool state plus staged raw bytes into exportable output.
//!
//! # Architecture
//!
//! ```text
//! Source → Raw Bytes → Pool (SHA3-512 sponge) → Extractor → this module → Output
//! ```
//!
//! # Extraction function
//!
//! Each extraction block is
//!
//! ```text
//! SHA-256( "chaosmagnet/extract/v1" || pool_digest[64] || chunk[256] || counter_le[8] )
//! ```
//!
//! The chunk is the exact run of staged raw bytes the extraction consumed; the
//! pool digest ties the output to every byte ever absorbed. Copies handed to
//! the network are re-derived under a separate label with [`derive_labeled`],
//! so publishing them reveals nothing about the locally kept block.

use sha2::{Digest, Sha256};

/// Domain tag for extraction blocks.
const EXTRACT_DOMAIN: &[u8] = b"chaosmagnet/extract/v1";

/// Output size of one extraction, in bytes.
pub const EXTRACTED_BLOCK_BYTES: usize = 32;

/// Derive one whitened block from the pool digest and a staged raw chunk.
pub fn extract_block(pool_digest: &[u8], chunk: &[u8], counter: u64) -> [u8; EXTRACTED_BLOCK_BYTES] {
    let mut h = Sha256::new();
    h.update(EXTRACT_DOMAIN);
    h.update(pool_digest);
    h.update(chunk);
    h.update(counter.to_le_bytes());
    h.finalize().into()
}

/// One-way, domain-separated derivation of a 32-byte value from `input`.
pub fn derive_labeled(label: &[u8], input: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update((label.len() as u64).to_le_bytes());
    h.update(label);
    h.update(input);
    h.finalize().into()
}

// ---------------------------------------------------------------------------
// Quick analysis utilities
// ---------------------------------------------------------------------------

/// Quick Shannon entropy in bits/byte for a byte slice.
pub fn quick_shannon(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let n = data.len() as f64;
    let mut h = 0.0;
    for &c in &counts {
        if c > 0 {
            let p = c as f64 / n;
            h -= p * p.log2();
        }
    }
    h
}

/// Quick min-entropy in bits/byte: `-log2(p_max)` of the most common byte.
pub fn quick_min_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    let p_max = max as f64 / data.len() as f64;
    if p_max >= 1.0 {
        return 0.0;
    }
    -p_max.log2()
}
