//! AudioNoiseSource — Microphone ADC noise via ffmpeg.
//!
//! Captures a short burst of audio from the input device, then keeps the
//! lower 4 bits of each int16 sample. With no signal present these LSBs are
//! dominated by Johnson-Nyquist thermal noise in the input stage.
//!
//! The capture backend is avfoundation (`":0"`) on macOS and ALSA
//! (`"default"`) on Linux. `CHAOSMAGNET_AUDIO_DEVICE` overrides the device
//! selector on either.

use std::process::Command;
use std::time::Duration;

use crate::source::{
    EntropySource, HarvesterId, Platform, Requirement, SourceCategory, SourceInfo,
};

use super::helpers::{command_exists, env_override, output_with_deadline, pack_nibbles};

/// Duration of one capture in seconds.
const CAPTURE_DURATION: &str = "0.1";

const SAMPLE_RATE: &str = "44100";

/// A capture still running after this is killed and yields nothing.
const CAPTURE_DEADLINE: Duration = Duration::from_secs(2);

static AUDIO_NOISE_INFO: SourceInfo = SourceInfo {
    id: HarvesterId::Audio,
    name: "audio_noise",
    description: "Microphone ADC thermal noise (Johnson-Nyquist) via ffmpeg",
    physics: "Records from the microphone ADC with no signal present. The LSBs capture \
              Johnson-Nyquist noise: thermal agitation of electrons in the input \
              impedance produces voltage noise proportional to \u{221a}(4kTR\u{0394}f).",
    category: SourceCategory::Signal,
    platform: Platform::Unix,
    requirements: &[Requirement::Ffmpeg, Requirement::AudioInput],
    cadence: Duration::from_millis(200),
    sample_size: 256,
};

/// Entropy source that harvests thermal noise from the microphone ADC.
pub struct AudioNoiseSource {
    device: Option<String>,
}

impl AudioNoiseSource {
    pub fn new() -> Self {
        Self {
            device: env_override("CHAOSMAGNET_AUDIO_DEVICE"),
        }
    }

    /// ffmpeg input format and selector for this platform.
    fn input(&self) -> Option<(&'static str, String)> {
        if cfg!(target_os = "macos") {
            let dev = self.device.clone().unwrap_or_else(|| "0".into());
            Some(("avfoundation", format!(":{}", dev.trim_start_matches(':'))))
        } else if cfg!(target_os = "linux") {
            Some(("alsa", self.device.clone().unwrap_or_else(|| "default".into())))
        } else {
            None
        }
    }
}

impl Default for AudioNoiseSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for AudioNoiseSource {
    fn info(&self) -> &SourceInfo {
        &AUDIO_NOISE_INFO
    }

    fn is_available(&self) -> bool {
        if self.input().is_none() || !command_exists("ffmpeg") {
            return false;
        }
        // ALSA exposes capture devices under /dev/snd.
        !cfg!(target_os = "linux") || std::path::Path::new("/dev/snd").exists()
    }

    fn collect(&self, n_samples: usize) -> Vec<u8> {
        let Some((format, input)) = self.input() else {
            return Vec::new();
        };

        // ffmpeg -f <fmt> -i <dev> -t 0.1 -f s16le -ar 44100 -ac 1 pipe:1
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            format,
            "-i",
            &input,
            "-t",
            CAPTURE_DURATION,
            "-f",
            "s16le",
            "-ar",
            SAMPLE_RATE,
            "-ac",
            "1",
            "pipe:1",
        ]);
        let Some(raw_audio) = output_with_deadline(&mut cmd, CAPTURE_DEADLINE) else {
            return Vec::new();
        };

        let nibbles = raw_audio.chunks_exact(2).map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            (sample & 0x0F) as u8
        });

        pack_nibbles(nibbles, n_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_noise_info() {
        let src = AudioNoiseSource::new();
        assert_eq!(src.name(), "audio_noise");
        assert_eq!(src.id(), HarvesterId::Audio);
        assert_eq!(src.info().category, SourceCategory::Signal);
        assert_eq!(src.info().cadence, Duration::from_millis(200));
    }

    #[test]
    fn audio_input_selector() {
        let src = AudioNoiseSource {
            device: Some("hw:1".into()),
        };
        if cfg!(target_os = "linux") {
            assert_eq!(src.input(), Some(("alsa", "hw:1".to_string())));
        }
        let src = AudioNoiseSource { device: None };
        if cfg!(target_os = "macos") {
            assert_eq!(src.input(), Some(("avfoundation", ":0".to_string())));
        }
    }

    #[test]
    #[ignore] // Requires a microphone and ffmpeg
    fn audio_noise_collects_bytes() {
        let src = AudioNoiseSource::new();
        if src.is_available() {
            let data = src.collect(64);
            assert!(!data.is_empty());
            assert!(data.len() <= 64);
        }
    }
}
