//! HardwareRngSource — dedicated RNG hardware, or the OS CSPRNG.
//!
//! Reads `/dev/hwrng` (override with `CHAOSMAGNET_HWRNG`) when the kernel
//! exposes a hardware generator. Otherwise falls back to the OS CSPRNG via
//! `getrandom`, which on most platforms is itself fed by on-die RNG
//! instructions.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::source::{EntropySource, HarvesterId, Platform, SourceCategory, SourceInfo};

use super::helpers::device_path;

static HARDWARE_RNG_INFO: SourceInfo = SourceInfo {
    id: HarvesterId::Trng,
    name: "hardware_rng",
    description: "Hardware RNG device node, falling back to the OS CSPRNG",
    physics: "Dedicated generators sample thermal or shot noise in on-chip ring \
              oscillators and condition it in hardware. When no device node is exposed \
              the OS CSPRNG stands in; it is seeded from the same hardware plus interrupt \
              timing.",
    category: SourceCategory::Hardware,
    platform: Platform::Any,
    requirements: &[],
    cadence: Duration::from_secs(1),
    sample_size: 256,
};

/// Entropy source backed by `/dev/hwrng` or `getrandom`.
pub struct HardwareRngSource {
    device: PathBuf,
}

impl HardwareRngSource {
    pub fn new() -> Self {
        Self {
            device: device_path("CHAOSMAGNET_HWRNG", "/dev/hwrng"),
        }
    }

    fn read_device(&self, n: usize) -> Option<Vec<u8>> {
        let mut f = File::open(&self.device).ok()?;
        let mut buf = vec![0u8; n];
        f.read_exact(&mut buf).ok()?;
        Some(buf)
    }
}

impl Default for HardwareRngSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for HardwareRngSource {
    fn info(&self) -> &SourceInfo {
        &HARDWARE_RNG_INFO
    }

    fn is_available(&self) -> bool {
        let mut probe = [0u8; 1];
        self.device.exists() || getrandom::fill(&mut probe).is_ok()
    }

    fn collect(&self, n_samples: usize) -> Vec<u8> {
        if let Some(buf) = self.read_device(n_samples) {
            return buf;
        }
        let mut buf = vec![0u8; n_samples];
        match getrandom::fill(&mut buf) {
            Ok(()) => buf,
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_rng_info() {
        let src = HardwareRngSource::new();
        assert_eq!(src.name(), "hardware_rng");
        assert_eq!(src.id(), HarvesterId::Trng);
        assert_eq!(src.info().sample_size, 256);
    }

    #[test]
    fn falls_back_to_os_rng() {
        let src = HardwareRngSource {
            device: PathBuf::from("/nonexistent/chaosmagnet-hwrng"),
        };
        assert!(src.is_available());
        let data = src.collect(256);
        assert_eq!(data.len(), 256);
        assert!(crate::health::check(&data).passed());
    }
}
