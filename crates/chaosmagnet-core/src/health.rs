//! Continuous health tests applied to every sample before absorption.
//!
//! Two SP 800-90B style checks catch a stuck or badly biased channel:
//!
//! - **Repetition count test**: fails when one byte value repeats
//!   [`RCT_CUTOFF`] or more times in a row.
//! - **Adaptive proportion test**: fails when the most common byte makes up
//!   [`APT_CUTOFF`] or more of a sample. Samples shorter than
//!   [`APT_MIN_SAMPLE`] are too small for a meaningful proportion and skip it.

/// Consecutive identical bytes that fail the repetition count test.
pub const RCT_CUTOFF: usize = 10;

/// Share of the most common byte that fails the adaptive proportion test.
pub const APT_CUTOFF: f64 = 0.40;

/// Minimum sample length for the adaptive proportion test.
pub const APT_MIN_SAMPLE: usize = 16;

/// Outcome of the health tests for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Pass,
    /// Longest run of one byte value.
    RepetitionFailure(usize),
    /// Percent of the sample taken by the most common byte.
    ProportionFailure(u8),
    Empty,
}

impl HealthVerdict {
    pub fn passed(self) -> bool {
        self == HealthVerdict::Pass
    }
}

/// Longest run of identical consecutive bytes.
pub fn longest_run(data: &[u8]) -> usize {
    let mut longest = 0usize;
    let mut run = 0usize;
    let mut last = None;
    for &b in data {
        if Some(b) == last {
            run += 1;
        } else {
            run = 1;
            last = Some(b);
        }
        longest = longest.max(run);
    }
    longest
}

/// Fraction of `data` taken by its most common byte value.
pub fn max_proportion(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    max as f64 / data.len() as f64
}

/// Run both tests on one sample.
pub fn check(data: &[u8]) -> HealthVerdict {
    if data.is_empty() {
        return HealthVerdict::Empty;
    }
    let run = longest_run(data);
    if run >= RCT_CUTOFF {
        return HealthVerdict::RepetitionFailure(run);
    }
    if data.len() >= APT_MIN_SAMPLE {
        let p = max_proportion(data);
        if p >= APT_CUTOFF {
            return HealthVerdict::ProportionFailure((p * 100.0).round() as u8);
        }
    }
    HealthVerdict::Pass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varied_sample_passes() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(check(&data), HealthVerdict::Pass);
    }

    #[test]
    fn test_stuck_source_fails_repetition() {
        let mut data: Vec<u8> = (0..64).collect();
        data.extend([0xEE; 12]);
        assert_eq!(check(&data), HealthVerdict::RepetitionFailure(12));
    }

    #[test]
    fn test_run_below_cutoff_passes_repetition() {
        let mut data: Vec<u8> = (0..200).map(|i| i as u8).collect();
        data.extend([0xEE; RCT_CUTOFF - 1]);
        assert!(check(&data).passed());
    }

    #[test]
    fn test_biased_source_fails_proportion() {
        // 0xAA every other byte: no long runs, but 50% share.
        let data: Vec<u8> = (0..64u8)
            .map(|i| if i % 2 == 0 { 0xAA } else { i })
            .collect();
        assert_eq!(check(&data), HealthVerdict::ProportionFailure(50));
    }

    #[test]
    fn test_short_sample_skips_proportion() {
        let data = [1u8, 1, 2, 1, 3, 1, 4, 1];
        assert!(check(&data).passed());
    }

    #[test]
    fn test_empty_sample() {
        assert_eq!(check(&[]), HealthVerdict::Empty);
        assert!(!HealthVerdict::Empty.passed());
    }
}
