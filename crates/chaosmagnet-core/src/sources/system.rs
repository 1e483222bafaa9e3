//! SystemJitterSource — CPU and scheduler timing jitter.
//!
//! Times a rotating set of tiny workloads (a scheduler yield, a heap
//! allocation, a short dependent arithmetic chain) with the high-resolution
//! counter. The nanosecond jitter in those timings comes from cache state,
//! interrupts, frequency scaling and every other process on the machine.

use std::time::Duration;

use crate::source::{EntropySource, HarvesterId, Platform, SourceCategory, SourceInfo};

use super::helpers::{extract_timing_entropy, mach_time};

static SYSTEM_JITTER_INFO: SourceInfo = SourceInfo {
    id: HarvesterId::System,
    name: "system_jitter",
    description: "CPU and scheduler timing jitter of small workloads",
    physics: "Measures the duration of scheduler yields, allocator calls and short \
              arithmetic chains. Their nanosecond variation reflects cache and TLB state, \
              interrupt arrival, DVFS transitions and contention from other processes.",
    category: SourceCategory::Timing,
    platform: Platform::Any,
    requirements: &[],
    cadence: Duration::from_millis(500),
    sample_size: 128,
};

/// Entropy source that harvests timing jitter from the running system.
pub struct SystemJitterSource;

fn workload(round: usize) {
    match round % 3 {
        0 => std::thread::yield_now(),
        1 => {
            let v: Vec<u8> = Vec::with_capacity(64 + (round & 0xFF));
            std::hint::black_box(v);
        }
        _ => {
            let mut acc = round as u64;
            for i in 0..32u64 {
                acc = acc.rotate_left(7) ^ i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            }
            std::hint::black_box(acc);
        }
    }
}

impl EntropySource for SystemJitterSource {
    fn info(&self) -> &SourceInfo {
        &SYSTEM_JITTER_INFO
    }

    fn is_available(&self) -> bool {
        true
    }

    fn collect(&self, n_samples: usize) -> Vec<u8> {
        let rounds = n_samples + 2;
        let mut timings = Vec::with_capacity(rounds + 1);
        timings.push(mach_time());
        for round in 0..rounds {
            workload(round);
            timings.push(mach_time());
        }
        extract_timing_entropy(&timings, n_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_jitter_info() {
        let src = SystemJitterSource;
        assert_eq!(src.name(), "system_jitter");
        assert_eq!(src.id(), HarvesterId::System);
        assert_eq!(src.info().category, SourceCategory::Timing);
        assert!(src.is_available());
    }

    #[test]
    fn system_jitter_collects_requested_length() {
        let data = SystemJitterSource.collect(64);
        assert_eq!(data.len(), 64);
    }
}
