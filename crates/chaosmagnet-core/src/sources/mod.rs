//! The five harvesting channels.

pub mod helpers;

pub mod audio;
pub mod mouse;
pub mod system;
pub mod trng;
pub mod video;

use crate::source::{EntropySource, HarvesterId};

/// Construct the source for one harvester slot.
pub fn source_for(id: HarvesterId) -> Box<dyn EntropySource> {
    match id {
        HarvesterId::System => Box::new(system::SystemJitterSource),
        HarvesterId::Trng => Box::new(trng::HardwareRngSource::new()),
        HarvesterId::Audio => Box::new(audio::AudioNoiseSource::new()),
        HarvesterId::Video => Box::new(video::CameraNoiseSource::new()),
        HarvesterId::Mouse => Box::new(mouse::PointerInputSource::new()),
    }
}

/// All sources, in [`HarvesterId::ALL`] order.
pub fn all_sources() -> Vec<Box<dyn EntropySource>> {
    HarvesterId::ALL.into_iter().map(source_for).collect()
}
