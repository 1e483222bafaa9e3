//! Abstract entropy source trait and harvester identities.
//!
//! Every entropy channel implements the [`EntropySource`] trait, which provides
//! metadata via [`SourceInfo`], a one-time availability probe, and raw sample
//! collection. The engine never inspects a source beyond this interface, so a
//! new channel only needs a new trait implementation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Identity of one of the five harvesting channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HarvesterId {
    /// CPU timing jitter and kernel counters.
    System,
    /// Hardware RNG, or the OS CSPRNG when no device node is exposed.
    Trng,
    /// Microphone ADC noise.
    Audio,
    /// Camera sensor noise.
    Video,
    /// Pointer movement and inter-event timing.
    Mouse,
}

impl HarvesterId {
    /// All identities in reporting order.
    pub const ALL: [HarvesterId; 5] = [
        HarvesterId::System,
        HarvesterId::Trng,
        HarvesterId::Audio,
        HarvesterId::Video,
        HarvesterId::Mouse,
    ];

    /// Upper-case tag used in logs and the metrics document.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Trng => "TRNG",
            Self::Audio => "AUDIO",
            Self::Video => "VIDEO",
            Self::Mouse => "MOUSE",
        }
    }
}

impl fmt::Display for HarvesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarvesterId {
    type Err = EngineError;

    /// Accepts the canonical tags plus the labels a dashboard typically shows
    /// (`"SYS"`, `"Hardware/TRNG"`, `"Audio (Mic)"`, ...), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SYSTEM" | "SYS" | "SYSTEM/CPU" => Ok(Self::System),
            "TRNG" | "HARDWARE/TRNG" => Ok(Self::Trng),
            "AUDIO" | "AUDIO (MIC)" => Ok(Self::Audio),
            "VIDEO" | "VIDEO (CAM)" => Ok(Self::Video),
            "MOUSE" | "HID (MOUSE)" => Ok(Self::Mouse),
            other => Err(EngineError::Configuration(format!(
                "unknown harvester '{other}'"
            ))),
        }
    }
}

/// Category of entropy source based on physical mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    /// CPU/memory timing jitter.
    Timing,
    /// Dedicated random number generator hardware.
    Hardware,
    /// Analog-to-digital converter noise.
    Signal,
    /// Image sensor readings.
    Sensor,
    /// Human input devices.
    Input,
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timing => write!(f, "timing"),
            Self::Hardware => write!(f, "hardware"),
            Self::Signal => write!(f, "signal"),
            Self::Sensor => write!(f, "sensor"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Target platform for an entropy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Works on any platform.
    Any,
    /// Requires macOS.
    MacOS,
    /// Requires Linux.
    Linux,
    /// macOS or Linux.
    Unix,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::MacOS => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
            Self::Unix => write!(f, "unix"),
        }
    }
}

/// Hardware/software requirement for an entropy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// `ffmpeg` on `PATH` for device capture.
    Ffmpeg,
    /// An audio input device.
    AudioInput,
    /// A camera.
    Camera,
    /// A readable pointer device node.
    InputDevice,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ffmpeg => write!(f, "ffmpeg"),
            Self::AudioInput => write!(f, "audio_input"),
            Self::Camera => write!(f, "camera"),
            Self::InputDevice => write!(f, "input_device"),
        }
    }
}

/// Metadata about an entropy source.
///
/// Besides the descriptive fields, each source declares how often its
/// harvester should sample it and how many bytes one sample asks for.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Harvester slot this source fills.
    pub id: HarvesterId,
    /// Unique identifier (e.g. `"cpu_jitter"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Physics explanation of the entropy mechanism.
    pub physics: &'static str,
    /// Source category for classification.
    pub category: SourceCategory,
    /// Target platform.
    pub platform: Platform,
    /// Hardware/software requirements beyond the platform.
    pub requirements: &'static [Requirement],
    /// Pause between two samples.
    pub cadence: Duration,
    /// Bytes requested per sample.
    pub sample_size: usize,
}

/// Trait that every entropy source must implement.
pub trait EntropySource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    ///
    /// Called once when the harvester is built; the answer is cached for the
    /// lifetime of the engine.
    fn is_available(&self) -> bool;

    /// Collect raw entropy samples. Returns a `Vec<u8>` of up to `n_samples`
    /// bytes; an empty vector means nothing could be read this cycle.
    fn collect(&self, n_samples: usize) -> Vec<u8>;

    /// Release any device handle or helper process held between samples.
    fn release(&self) {}

    /// Convenience: harvester id from info.
    fn id(&self) -> HarvesterId {
        self.info().id
    }

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}
