//! CameraNoiseSource — Camera sensor noise via a persistent ffmpeg stream.
//!
//! Streams small grayscale frames from the camera and keeps the lower 4 bits
//! of each pixel. At typical webcam exposures these LSBs are dominated by
//! amplifier read noise, with smaller dark-current and shot-noise terms.
//!
//! One long-lived ffmpeg child streams frames into a reader thread; each
//! `collect()` packs nibbles from the latest frame, and only from a frame it
//! has not used before. A stream that stops producing frames is restarted.
//! `release()` kills the child so the camera is not held while the harvester
//! is disabled.
//!
//! Device selection: v4l2 `/dev/video0` on Linux, avfoundation index `0` on
//! macOS; `CHAOSMAGNET_CAMERA_DEVICE` overrides either.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::source::{
    EntropySource, HarvesterId, Platform, Requirement, SourceCategory, SourceInfo,
};

use super::helpers::{command_exists, env_override, pack_nibbles};

const FRAME_WIDTH: usize = 160;
const FRAME_HEIGHT: usize = 120;
const FRAME_SIZE: usize = FRAME_WIDTH * FRAME_HEIGHT;

/// How long to wait for the first frame before giving up on a device.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// A stream with no new frame for this long is killed and respawned.
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

static CAMERA_NOISE_INFO: SourceInfo = SourceInfo {
    id: HarvesterId::Video,
    name: "camera_noise",
    description: "Camera sensor noise (read noise + dark current) via ffmpeg",
    physics: "Captures frames from the camera sensor. Read noise from the pixel \
              amplifier dominates at short exposures, with dark current from thermal \
              carrier generation and its Poisson shot noise on top. The LSBs of pixel \
              values mix all three.",
    category: SourceCategory::Sensor,
    platform: Platform::Unix,
    requirements: &[Requirement::Ffmpeg, Requirement::Camera],
    cadence: Duration::from_secs(1),
    sample_size: 512,
};

/// Latest frame plus a generation counter bumped on every new frame.
#[derive(Default)]
struct FrameState {
    generation: u64,
    frame: Option<Vec<u8>>,
}

#[derive(Clone, Default)]
struct FrameSlot(Arc<Mutex<FrameState>>);

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, frame: &[u8]) {
        let mut state = self.lock();
        state.generation += 1;
        state.frame = Some(frame.to_vec());
    }

    fn close(&self) {
        self.lock().frame = None;
    }

    fn has_frame(&self) -> bool {
        self.lock().frame.is_some()
    }
}

#[derive(Debug, PartialEq)]
enum FrameRead {
    Fresh(Vec<u8>),
    Stale,
    Closed,
}

/// Hands out each published frame at most once.
#[derive(Default)]
struct FrameCursor {
    seen: u64,
}

impl FrameCursor {
    fn next(&mut self, slot: &FrameSlot) -> FrameRead {
        let state = slot.lock();
        match &state.frame {
            None => FrameRead::Closed,
            Some(_) if state.generation == self.seen => FrameRead::Stale,
            Some(frame) => {
                self.seen = state.generation;
                FrameRead::Fresh(frame.clone())
            }
        }
    }
}

/// A long-lived ffmpeg process streaming grayscale frames.
struct PersistentCamera {
    child: Child,
    latest_frame: FrameSlot,
    cursor: FrameCursor,
    last_fresh: Instant,
    _reader: JoinHandle<()>,
}

impl PersistentCamera {
    /// Spawn ffmpeg for `input` and wait for the first frame.
    fn spawn(format: &str, input: &str) -> Option<Self> {
        let size = format!("{FRAME_WIDTH}x{FRAME_HEIGHT}");
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostdin",
                "-f",
                format,
                "-framerate",
                "30",
                "-video_size",
                &size,
                "-i",
                input,
                "-f",
                "rawvideo",
                "-pix_fmt",
                "gray",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        let stdout = child.stdout.take()?;
        let latest_frame = FrameSlot::default();
        let slot = latest_frame.clone();
        let reader = thread::Builder::new()
            .name("chaosmagnet-camera".into())
            .spawn(move || Self::reader_loop(stdout, slot))
            .ok()?;

        let deadline = Instant::now() + FIRST_FRAME_TIMEOUT;
        loop {
            if latest_frame.has_frame() {
                break;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            thread::sleep(Duration::from_millis(25));
        }

        Some(Self {
            child,
            latest_frame,
            cursor: FrameCursor::default(),
            last_fresh: Instant::now(),
            _reader: reader,
        })
    }

    /// Read whole frames until ffmpeg exits, then clear the slot.
    fn reader_loop(mut stdout: ChildStdout, slot: FrameSlot) {
        let mut buf = vec![0u8; FRAME_SIZE];
        while stdout.read_exact(&mut buf).is_ok() {
            slot.publish(&buf);
        }
        slot.close();
    }

    fn take_frame(&mut self) -> FrameRead {
        let read = self.cursor.next(&self.latest_frame);
        match read {
            FrameRead::Fresh(_) => self.last_fresh = Instant::now(),
            FrameRead::Stale if self.last_fresh.elapsed() >= STALL_TIMEOUT => {
                return FrameRead::Closed;
            }
            _ => {}
        }
        read
    }
}

impl Drop for PersistentCamera {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Entropy source that harvests sensor noise from camera frames.
pub struct CameraNoiseSource {
    device: Option<String>,
    camera: Mutex<Option<PersistentCamera>>,
}

impl CameraNoiseSource {
    pub fn new() -> Self {
        Self {
            device: env_override("CHAOSMAGNET_CAMERA_DEVICE"),
            camera: Mutex::new(None),
        }
    }

    /// ffmpeg input format and selector for this platform.
    fn input(&self) -> Option<(&'static str, String)> {
        if cfg!(target_os = "macos") {
            let dev = self.device.clone().unwrap_or_else(|| "0".into());
            Some(("avfoundation", format!("{dev}:none")))
        } else if cfg!(target_os = "linux") {
            Some((
                "v4l2",
                self.device.clone().unwrap_or_else(|| "/dev/video0".into()),
            ))
        } else {
            None
        }
    }

    fn lock_camera(&self) -> MutexGuard<'_, Option<PersistentCamera>> {
        self.camera.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CameraNoiseSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for CameraNoiseSource {
    fn info(&self) -> &SourceInfo {
        &CAMERA_NOISE_INFO
    }

    fn is_available(&self) -> bool {
        let Some((format, input)) = self.input() else {
            return false;
        };
        if !command_exists("ffmpeg") {
            return false;
        }
        format != "v4l2" || std::path::Path::new(&input).exists()
    }

    fn collect(&self, n_samples: usize) -> Vec<u8> {
        let Some((format, input)) = self.input() else {
            return Vec::new();
        };
        let mut guard = self.lock_camera();

        if guard.is_none() {
            *guard = PersistentCamera::spawn(format, &input);
        }
        let Some(cam) = guard.as_mut() else {
            return Vec::new();
        };

        let frame = match cam.take_frame() {
            FrameRead::Fresh(frame) => frame,
            FrameRead::Stale => return Vec::new(),
            FrameRead::Closed => {
                // ffmpeg died or stalled; respawn on the next call.
                *guard = None;
                return Vec::new();
            }
        };

        pack_nibbles(frame.iter().map(|pixel| pixel & 0x0F), n_samples)
    }

    fn release(&self) {
        self.lock_camera().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_noise_info() {
        let src = CameraNoiseSource::new();
        assert_eq!(src.name(), "camera_noise");
        assert_eq!(src.id(), HarvesterId::Video);
        assert_eq!(src.info().category, SourceCategory::Sensor);
        assert_eq!(src.info().sample_size, 512);
    }

    #[test]
    fn camera_explicit_device() {
        let src = CameraNoiseSource {
            device: Some("/dev/video2".into()),
            camera: Mutex::new(None),
        };
        if cfg!(target_os = "linux") {
            assert_eq!(src.input(), Some(("v4l2", "/dev/video2".to_string())));
        }
    }

    #[test]
    fn each_frame_is_used_once() {
        let slot = FrameSlot::default();
        let mut cursor = FrameCursor::default();
        assert_eq!(cursor.next(&slot), FrameRead::Closed);

        slot.publish(&[1, 2, 3]);
        assert_eq!(cursor.next(&slot), FrameRead::Fresh(vec![1, 2, 3]));
        assert_eq!(cursor.next(&slot), FrameRead::Stale);
        assert_eq!(cursor.next(&slot), FrameRead::Stale);

        slot.publish(&[1, 2, 3]);
        assert_eq!(cursor.next(&slot), FrameRead::Fresh(vec![1, 2, 3]));

        slot.close();
        assert_eq!(cursor.next(&slot), FrameRead::Closed);
    }

    #[test]
    fn release_without_camera_is_noop() {
        let src = CameraNoiseSource::new();
        src.release();
        assert!(src.lock_camera().is_none());
    }

    #[test]
    fn camera_source_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CameraNoiseSource>();
    }

    #[test]
    #[ignore] // Requires camera and ffmpeg
    fn camera_noise_collects_bytes() {
        let src = CameraNoiseSource::new();
        if src.is_available() {
            let data = src.collect(64);
            assert!(!data.is_empty());
            assert!(data.len() <= 64);
            src.release();
        }
    }
}
