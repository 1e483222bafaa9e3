//! Threshold extraction of whitened output.
//!
//! Harvester bytes are staged here after the pool has absorbed them. Each
//! time [`EXTRACTION_THRESHOLD`] raw bytes are staged, exactly one 32-byte
//! block is derived through [`conditioning::extract_block`] and the consumed
//! bytes leave the staging buffer; any remainder carries over to the next
//! extraction.
//!
//! Peer bytes are never staged. They strengthen the pool, but a block is only
//! ever triggered by local harvesting, so a peer can never be the sole source
//! of an extraction.

use std::collections::VecDeque;

use zeroize::Zeroize;

use crate::conditioning::{self, EXTRACTED_BLOCK_BYTES};
use crate::pool::HISTORY_LEN;
use crate::quality::WindowEstimator;

/// Raw bytes consumed by one extraction.
pub const EXTRACTION_THRESHOLD: usize = 256;

/// Whitened bytes retained for local consumers such as the vault.
pub const EXPORT_CAPACITY: usize = 8192;

/// Staging buffer plus extraction accounting.
pub struct Extractor {
    staging: Vec<u8>,
    extractions: u64,
    total_raw_consumed: u64,
    total_extracted: u64,
    whitened: WindowEstimator,
    history_whitened: VecDeque<f64>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            staging: Vec::with_capacity(EXTRACTION_THRESHOLD * 2),
            extractions: 0,
            total_raw_consumed: 0,
            total_extracted: 0,
            whitened: WindowEstimator::default(),
            history_whitened: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    /// Append raw harvester bytes to the staging buffer.
    pub fn stage(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
    }

    /// Run every extraction the staged bytes allow, in order.
    ///
    /// `pool_digest` is the pool state after the triggering absorption.
    pub fn extract_ready(&mut self, pool_digest: &[u8]) -> Vec<[u8; EXTRACTED_BLOCK_BYTES]> {
        let mut blocks = Vec::new();
        while self.staging.len() >= EXTRACTION_THRESHOLD {
            let mut chunk: Vec<u8> = self.staging.drain(..EXTRACTION_THRESHOLD).collect();
            let block = conditioning::extract_block(pool_digest, &chunk, self.extractions);
            chunk.zeroize();

            self.extractions += 1;
            self.total_raw_consumed += EXTRACTION_THRESHOLD as u64;
            self.total_extracted += EXTRACTED_BLOCK_BYTES as u64;

            self.whitened.extend(&block);
            if self.history_whitened.len() == HISTORY_LEN {
                self.history_whitened.pop_front();
            }
            self.history_whitened.push_back(self.whitened.shannon());

            blocks.push(block);
        }
        blocks
    }

    /// Raw bytes waiting in the staging buffer.
    pub fn accumulated(&self) -> usize {
        self.staging.len()
    }

    /// Staging fill relative to the threshold, clamped to [0, 100].
    pub fn fill_percent(&self) -> f64 {
        (self.staging.len() as f64 / EXTRACTION_THRESHOLD as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn extractions_count(&self) -> u64 {
        self.extractions
    }

    pub fn total_raw_consumed(&self) -> u64 {
        self.total_raw_consumed
    }

    pub fn total_extracted_bytes(&self) -> u64 {
        self.total_extracted
    }

    /// Raw bytes consumed per whitened byte emitted; 0 before the first extraction.
    pub fn ratio(&self) -> f64 {
        if self.total_extracted == 0 {
            0.0
        } else {
            self.total_raw_consumed as f64 / self.total_extracted as f64
        }
    }

    pub fn history_whitened(&self) -> Vec<f64> {
        self.history_whitened.iter().copied().collect()
    }

    /// Shannon estimate over recently emitted whitened bytes.
    pub fn current_whitened_entropy(&self) -> f64 {
        self.whitened.shannon()
    }

    /// Wipe staged bytes that never reached an extraction.
    pub fn clear(&mut self) {
        self.staging.zeroize();
        self.staging.clear();
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("accumulated", &self.staging.len())
            .field("extractions", &self.extractions)
            .field("total_raw_consumed", &self.total_raw_consumed)
            .field("total_extracted", &self.total_extracted)
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO of whitened bytes for local consumers.
///
/// When full, the oldest bytes are dropped. Reads are all-or-nothing so a
/// consumer never receives a short seed.
#[derive(Default)]
pub struct ExportBuffer {
    buf: VecDeque<u8>,
}

impl ExportBuffer {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::with_capacity(EXPORT_CAPACITY),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == EXPORT_CAPACITY {
                self.buf.pop_front();
            }
            self.buf.push_back(b);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove and return exactly `n` bytes, or `None` if fewer are buffered.
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.buf.len() < n {
            return None;
        }
        Some(self.buf.drain(..n).collect())
    }

    pub fn clear(&mut self) {
        let (a, b) = self.buf.as_mut_slices();
        a.zeroize();
        b.zeroize();
        self.buf.clear();
    }
}

impl std::fmt::Debug for ExportBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: [u8; 64] = [3u8; 64];

    #[test]
    fn test_below_threshold_no_extraction() {
        let mut ex = Extractor::new();
        ex.stage(&[1u8; EXTRACTION_THRESHOLD - 1]);
        assert!(ex.extract_ready(&DIGEST).is_empty());
        assert_eq!(ex.extractions_count(), 0);
        assert_eq!(ex.accumulated(), EXTRACTION_THRESHOLD - 1);
        assert_eq!(ex.ratio(), 0.0);
    }

    #[test]
    fn test_exactly_one_extraction_per_threshold() {
        let mut ex = Extractor::new();
        ex.stage(&[9u8; EXTRACTION_THRESHOLD * 2 + 17]);
        let blocks = ex.extract_ready(&DIGEST);
        assert_eq!(blocks.len(), 2);
        assert_ne!(blocks[0], blocks[1]);
        assert_eq!(ex.extractions_count(), 2);
        assert_eq!(ex.accumulated(), 17);
        assert_eq!(ex.total_raw_consumed(), 2 * EXTRACTION_THRESHOLD as u64);
        assert_eq!(ex.total_extracted_bytes(), 64);
        assert!((ex.ratio() - 8.0).abs() < 1e-12);
        assert_eq!(ex.history_whitened().len(), 2);
    }

    #[test]
    fn test_remainder_carries_into_next_extraction() {
        let mut ex = Extractor::new();
        ex.stage(&[1u8; 200]);
        assert!(ex.extract_ready(&DIGEST).is_empty());
        ex.stage(&[2u8; 100]);
        assert_eq!(ex.extract_ready(&DIGEST).len(), 1);
        assert_eq!(ex.accumulated(), 44);
    }

    #[test]
    fn test_fill_percent_is_clamped() {
        let mut ex = Extractor::new();
        assert_eq!(ex.fill_percent(), 0.0);
        ex.stage(&[0u8; EXTRACTION_THRESHOLD / 2]);
        assert!((ex.fill_percent() - 50.0).abs() < 1e-12);
        ex.stage(&[0u8; EXTRACTION_THRESHOLD * 3]);
        assert_eq!(ex.fill_percent(), 100.0);
    }

    #[test]
    fn test_debug_shows_counts_not_staged_bytes() {
        let mut ex = Extractor::new();
        ex.stage(&[0xABu8; 40]);
        let shown = format!("{ex:?}");
        assert!(shown.contains("accumulated: 40"));
        assert!(!shown.contains("171"));
    }

    #[test]
    fn test_clear_drops_staging() {
        let mut ex = Extractor::new();
        ex.stage(&[5u8; 100]);
        ex.clear();
        assert_eq!(ex.accumulated(), 0);
    }

    #[test]
    fn test_export_buffer_drops_oldest() {
        let mut buf = ExportBuffer::new();
        let data: Vec<u8> = (0..EXPORT_CAPACITY + 10).map(|i| i as u8).collect();
        buf.push(&data);
        assert_eq!(buf.len(), EXPORT_CAPACITY);
        let first = buf.take(1).unwrap();
        assert_eq!(first[0], 10u8);
    }

    #[test]
    fn test_export_buffer_take_is_all_or_nothing() {
        let mut buf = ExportBuffer::new();
        buf.push(&[1u8; 40]);
        assert!(buf.take(64).is_none());
        assert_eq!(buf.len(), 40);
        buf.push(&[2u8; 24]);
        let seed = buf.take(64).unwrap();
        assert_eq!(seed.len(), 64);
        assert!(buf.is_empty());
    }
}
