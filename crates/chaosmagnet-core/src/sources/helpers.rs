//! Shared helpers used by multiple entropy source implementations.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// High-resolution timing
// ---------------------------------------------------------------------------

/// High-resolution timestamp in nanoseconds.
///
/// On macOS, this reads the system counter via `mach_absolute_time()`.
/// Elsewhere it falls back to `std::time::Instant` relative to a
/// process-local epoch.
#[cfg(target_os = "macos")]
pub fn mach_time() -> u64 {
    unsafe extern "C" {
        fn mach_absolute_time() -> u64;
    }
    // SAFETY: mach_absolute_time() is a stable macOS API with no preconditions.
    unsafe { mach_absolute_time() }
}

#[cfg(not(target_os = "macos"))]
pub fn mach_time() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// XOR-fold all 8 bytes of a `u64` into a single byte.
#[inline]
pub fn xor_fold_u64(v: u64) -> u8 {
    let b = v.to_le_bytes();
    b[0] ^ b[1] ^ b[2] ^ b[3] ^ b[4] ^ b[5] ^ b[6] ^ b[7]
}

/// Extract entropy bytes from a slice of raw timestamps.
///
/// Computes consecutive deltas, XORs adjacent deltas, then XOR-folds each
/// value into one output byte. Returns at most `n_samples` bytes; needs at
/// least 3 timings to produce anything.
pub fn extract_timing_entropy(timings: &[u64], n_samples: usize) -> Vec<u8> {
    if timings.len() < 3 {
        return Vec::new();
    }

    let deltas: Vec<u64> = timings
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]))
        .collect();

    let mut raw: Vec<u8> = deltas
        .windows(2)
        .map(|w| xor_fold_u64(w[0] ^ w[1]))
        .collect();
    raw.truncate(n_samples);
    raw
}

// ---------------------------------------------------------------------------
// Nibble packing
// ---------------------------------------------------------------------------

/// Pack pairs of 4-bit nibbles into bytes, high nibble first.
///
/// Used by the audio and video sources to pack noise LSBs. Returns at most
/// `max_bytes` bytes; a trailing odd nibble is kept in the high half.
pub fn pack_nibbles(nibbles: impl Iterator<Item = u8>, max_bytes: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(max_bytes);
    let mut buf: u8 = 0;
    let mut half = false;

    for nibble in nibbles {
        if output.len() >= max_bytes {
            break;
        }
        if half {
            output.push(buf | (nibble & 0x0F));
            half = false;
        } else {
            buf = (nibble & 0x0F) << 4;
            half = true;
        }
    }

    if half && output.len() < max_bytes {
        output.push(buf);
    }
    output
}

// ---------------------------------------------------------------------------
// Environment and tooling
// ---------------------------------------------------------------------------

/// Check if a command exists by running `which`.
pub fn command_exists(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `cmd` and return its stdout, killing it if it is still running after
/// `timeout`. `None` on spawn failure, timeout or a non-zero exit.
pub fn output_with_deadline(cmd: &mut Command, timeout: Duration) -> Option<Vec<u8>> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return None;
    };
    // Drain stdout concurrently so a full pipe cannot stall the child.
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
        }
    };
    let out = reader.join().ok()?;
    status.filter(|s| s.success()).map(|_| out)
}

/// Read a non-empty `CHAOSMAGNET_*` override.
pub fn env_override(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Device path from `var`, or `default` when unset.
pub fn device_path(var: &str, default: &str) -> PathBuf {
    env_override(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
