//! Running entropy quality estimates.
//!
//! [`WindowEstimator`] keeps a sliding window of the most recent bytes and a
//! byte-frequency histogram over it. Pushing one byte costs O(1): the
//! histogram, the running `Σ c·log2(c)` term, and the count-of-counts table
//! used to track the most frequent symbol are all updated in place.
//!
//! ```text
//! H_shannon = log2(N) − Σ c·log2(c) / N
//! H_min     = −log2(c_max / N)
//! ```
//!
//! [`QualityAnalyzer`] keeps one estimator per source plus one over the
//! interleaved stream of every absorbed byte (the pool-wide estimate).

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::source::HarvesterId;

/// Bytes kept in each sliding window.
pub const QUALITY_WINDOW: usize = 4096;

/// Pushes between exact recomputations of the running sum, to bound float drift.
const RESYNC_INTERVAL: u64 = 1 << 16;

/// Smoothing factor of the per-source average entropy.
const AVG_ALPHA: f64 = 0.05;

#[inline]
fn c_log2_c(c: u32) -> f64 {
    if c == 0 {
        0.0
    } else {
        let c = c as f64;
        c * c.log2()
    }
}

/// Sliding-window Shannon and min-entropy estimator.
#[derive(Debug, Clone)]
pub struct WindowEstimator {
    window: VecDeque<u8>,
    capacity: usize,
    counts: [u32; 256],
    /// `count_freq[k]` = number of symbols whose count is exactly `k`.
    count_freq: Vec<u32>,
    max_count: u32,
    sum_c_log_c: f64,
    pushes: u64,
}

impl WindowEstimator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut count_freq = vec![0u32; capacity + 1];
        count_freq[0] = 256;
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            counts: [0; 256],
            count_freq,
            max_count: 0,
            sum_c_log_c: 0.0,
            pushes: 0,
        }
    }

    /// Number of bytes currently in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn push(&mut self, byte: u8) {
        if self.window.len() == self.capacity {
            if let Some(old) = self.window.pop_front() {
                self.decrement(old);
            }
        }
        self.window.push_back(byte);
        self.increment(byte);

        self.pushes += 1;
        if self.pushes % RESYNC_INTERVAL == 0 {
            self.sum_c_log_c = self.counts.iter().map(|&c| c_log2_c(c)).sum();
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    fn increment(&mut self, byte: u8) {
        let c = self.counts[byte as usize];
        self.sum_c_log_c += c_log2_c(c + 1) - c_log2_c(c);
        self.count_freq[c as usize] -= 1;
        self.count_freq[c as usize + 1] += 1;
        self.counts[byte as usize] = c + 1;
        if c + 1 > self.max_count {
            self.max_count = c + 1;
        }
    }

    fn decrement(&mut self, byte: u8) {
        let c = self.counts[byte as usize];
        debug_assert!(c > 0);
        self.sum_c_log_c += c_log2_c(c - 1) - c_log2_c(c);
        self.count_freq[c as usize] -= 1;
        self.count_freq[c as usize - 1] += 1;
        self.counts[byte as usize] = c - 1;
        // The decremented symbol now sits at c - 1, so the max drops by at most one.
        if c == self.max_count && self.count_freq[c as usize] == 0 {
            self.max_count = c - 1;
        }
    }

    /// Shannon entropy of the window in bits/byte, clamped to [0, 8].
    pub fn shannon(&self) -> f64 {
        let n = self.window.len();
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        (n.log2() - self.sum_c_log_c / n).clamp(0.0, 8.0)
    }

    /// Min-entropy of the window in bits/byte, clamped to [0, 8].
    pub fn min_entropy(&self) -> f64 {
        let n = self.window.len();
        if n == 0 || self.max_count == 0 {
            return 0.0;
        }
        let p_max = self.max_count as f64 / n as f64;
        (-p_max.log2()).clamp(0.0, 8.0)
    }
}

impl Default for WindowEstimator {
    fn default() -> Self {
        Self::new(QUALITY_WINDOW)
    }
}

/// Where an absorbed sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKey {
    Harvester(HarvesterId),
    /// All entropy received from P2P peers, aggregated.
    Peers,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Harvester(id) => write!(f, "{id}"),
            Self::Peers => write!(f, "P2P"),
        }
    }
}

/// Quality record for one source, as reported in the metrics document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceQuality {
    /// Sliding-window Shannon entropy, bits/byte.
    pub raw_shannon: f64,
    /// Sliding-window min-entropy, bits/byte.
    pub min_entropy: f64,
    /// Samples absorbed.
    pub samples: u64,
    /// Exponential moving average of `raw_shannon`.
    pub avg_entropy: f64,
    /// Conservative entropy credit: Σ sample min-entropy × sample length.
    pub total_bits: f64,
    /// Samples dropped by the health tests.
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct SourceRecord {
    estimator: WindowEstimator,
    quality: SourceQuality,
}

/// Per-source and pool-wide quality tracking.
#[derive(Debug)]
pub struct QualityAnalyzer {
    sources: BTreeMap<SourceKey, SourceRecord>,
    pooled: WindowEstimator,
    estimated_true_bits: f64,
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            pooled: WindowEstimator::default(),
            estimated_true_bits: 0.0,
        }
    }

    /// Fold one absorbed sample into the per-source and pooled estimates.
    /// Returns the updated per-source record.
    pub fn observe(&mut self, key: SourceKey, sample: &[u8]) -> &SourceQuality {
        self.pooled.extend(sample);

        let record = self.sources.entry(key).or_default();
        record.estimator.extend(sample);
        let q = &mut record.quality;
        q.samples += 1;
        q.raw_shannon = record.estimator.shannon();
        q.min_entropy = record.estimator.min_entropy();
        q.avg_entropy = if q.samples == 1 {
            q.raw_shannon
        } else {
            q.avg_entropy * (1.0 - AVG_ALPHA) + q.raw_shannon * AVG_ALPHA
        };
        let credit = (q.min_entropy * sample.len() as f64).min(sample.len() as f64 * 8.0);
        q.total_bits += credit;
        self.estimated_true_bits += credit;
        q
    }

    /// Count a sample the health tests refused.
    pub fn reject(&mut self, key: SourceKey) {
        self.sources.entry(key).or_default().quality.rejected += 1;
    }

    /// Most recent pool-wide Shannon estimate, bits/byte in [0, 8].
    pub fn current_shannon(&self) -> f64 {
        self.pooled.shannon()
    }

    /// Most recent pool-wide min-entropy estimate, bits/byte in [0, 8].
    pub fn current_min_entropy(&self) -> f64 {
        self.pooled.min_entropy()
    }

    pub fn estimated_true_bits(&self) -> f64 {
        self.estimated_true_bits
    }

    pub fn source(&self, key: SourceKey) -> Option<&SourceQuality> {
        self.sources.get(&key).map(|r| &r.quality)
    }

    /// All records, harvesters first in id order, then peers.
    pub fn breakdown(&self) -> impl Iterator<Item = (SourceKey, &SourceQuality)> {
        self.sources.iter().map(|(k, r)| (*k, &r.quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_constant_stream_converges_to_zero() {
        let mut est = WindowEstimator::default();
        for _ in 0..3 * QUALITY_WINDOW {
            est.push(0x5A);
        }
        assert!(est.shannon() < 1e-9, "got {}", est.shannon());
        assert_eq!(est.min_entropy(), 0.0);
    }

    #[test]
    fn test_uniform_stream_converges_toward_eight() {
        let mut est = WindowEstimator::default();
        let mut buf = vec![0u8; 4 * QUALITY_WINDOW];
        rand::rng().fill_bytes(&mut buf);
        est.extend(&buf);
        assert!(est.shannon() > 7.9, "got {}", est.shannon());
        assert!(est.shannon() <= 8.0);
        assert!(est.min_entropy() > 6.0, "got {}", est.min_entropy());
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let mut est = WindowEstimator::new(300);
        let stream: Vec<u8> = (0..5000u32).map(|i| ((i * 31 + i / 7) % 97) as u8).collect();
        est.extend(&stream);
        let window = &stream[stream.len() - 300..];
        let expected = crate::conditioning::quick_shannon(window);
        assert!((est.shannon() - expected).abs() < 1e-9);
        let expected_min = crate::conditioning::quick_min_entropy(window);
        assert!((est.min_entropy() - expected_min).abs() < 1e-9);
    }

    #[test]
    fn test_max_count_tracks_evictions() {
        let mut est = WindowEstimator::new(4);
        est.extend(&[1, 1, 1, 2]);
        assert!((est.min_entropy() - (-(0.75f64).log2())).abs() < 1e-12);
        // Evict the three 1s one at a time.
        est.extend(&[3, 4, 5]);
        // Window is now [2, 3, 4, 5]: max count 1.
        assert!((est.min_entropy() - 2.0).abs() < 1e-12);
        assert!((est.shannon() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_analyzer_tracks_sources_separately() {
        let mut qa = QualityAnalyzer::new();
        let varied: Vec<u8> = (0..=255).collect();
        qa.observe(SourceKey::Harvester(HarvesterId::Trng), &varied);
        qa.observe(SourceKey::Harvester(HarvesterId::System), &[7u8; 32]);
        qa.reject(SourceKey::Harvester(HarvesterId::System));

        let trng = qa.source(SourceKey::Harvester(HarvesterId::Trng)).unwrap();
        assert_eq!(trng.samples, 1);
        assert!((trng.raw_shannon - 8.0).abs() < 1e-9);

        let sys = qa.source(SourceKey::Harvester(HarvesterId::System)).unwrap();
        assert_eq!(sys.samples, 1);
        assert_eq!(sys.rejected, 1);
        assert_eq!(sys.raw_shannon, 0.0);

        assert!(qa.current_shannon() > 0.0 && qa.current_shannon() <= 8.0);
        assert!(qa.estimated_true_bits() > 0.0);
        assert!(qa.source(SourceKey::Peers).is_none());
    }

    #[test]
    fn test_source_key_names() {
        assert_eq!(SourceKey::Harvester(HarvesterId::Video).to_string(), "VIDEO");
        assert_eq!(SourceKey::Peers.to_string(), "P2P");
    }
}
