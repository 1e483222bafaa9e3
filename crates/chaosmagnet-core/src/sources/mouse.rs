//! PointerInputSource — pointer movement and inter-event timing.
//!
//! Reads PS/2-style 3-byte packets from the kernel's aggregated pointer node
//! (`/dev/input/mice`, override with `CHAOSMAGNET_MOUSE_DEVICE`). The node is
//! opened non-blocking; each packet's dx/dy is folded together with the
//! nanosecond delta since the previous packet. Human motion carries little
//! entropy on its own; the timing of its arrival relative to the counter is
//! the useful part.
//!
//! No movement since the last cycle yields an empty sample. That is an idle
//! pointer, not a failure.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::source::{
    EntropySource, HarvesterId, Platform, Requirement, SourceCategory, SourceInfo,
};

use super::helpers::{device_path, mach_time, xor_fold_u64};

const PACKET_SIZE: usize = 3;

static POINTER_INPUT_INFO: SourceInfo = SourceInfo {
    id: HarvesterId::Mouse,
    name: "pointer_input",
    description: "Pointer movement deltas and inter-event timing",
    physics: "Hand tremor and motor noise perturb each motion report, and the arrival \
              time of each report relative to a nanosecond counter depends on USB polling \
              phase and interrupt latency.",
    category: SourceCategory::Input,
    platform: Platform::Linux,
    requirements: &[Requirement::InputDevice],
    cadence: Duration::from_millis(100),
    sample_size: 64,
};

struct PointerState {
    file: Option<File>,
    last_event: u64,
}

/// Entropy source reading the pointer device node.
pub struct PointerInputSource {
    device: PathBuf,
    state: Mutex<PointerState>,
}

impl PointerInputSource {
    pub fn new() -> Self {
        Self::with_device(device_path("CHAOSMAGNET_MOUSE_DEVICE", "/dev/input/mice"))
    }

    pub fn with_device(device: PathBuf) -> Self {
        Self {
            device,
            state: Mutex::new(PointerState {
                file: None,
                last_event: mach_time(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PointerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(unix)]
    fn open(&self) -> Option<File> {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.device)
            .ok()
    }

    #[cfg(not(unix))]
    fn open(&self) -> Option<File> {
        None
    }
}

impl Default for PointerInputSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold packets and their arrival deltas into sample bytes.
fn fold_packets(packets: &[u8], delta_ns: u64, out: &mut Vec<u8>) {
    for (i, p) in packets.chunks_exact(PACKET_SIZE).enumerate() {
        let t = delta_ns.rotate_left((i as u32 * 13) % 64);
        out.push(xor_fold_u64(t) ^ p[1]);
        out.push((t as u8) ^ p[2].rotate_left(4) ^ p[0]);
    }
}

impl EntropySource for PointerInputSource {
    fn info(&self) -> &SourceInfo {
        &POINTER_INPUT_INFO
    }

    fn is_available(&self) -> bool {
        cfg!(target_os = "linux") && self.open().is_some()
    }

    fn collect(&self, n_samples: usize) -> Vec<u8> {
        let mut state = self.lock_state();
        if state.file.is_none() {
            state.file = self.open();
        }

        let mut out = Vec::with_capacity(n_samples);
        let mut buf = [0u8; PACKET_SIZE * 32];
        while out.len() < n_samples {
            let Some(file) = state.file.as_mut() else {
                break;
            };
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    // Device vanished (unplugged); reopen next cycle.
                    state.file = None;
                    break;
                }
            };
            let now = mach_time();
            let delta = now.wrapping_sub(state.last_event);
            state.last_event = now;
            fold_packets(&buf[..n - n % PACKET_SIZE], delta, &mut out);
        }
        out.truncate(n_samples);
        out
    }

    fn release(&self) {
        self.lock_state().file = None;
    }
}
