//! The single writer of pool and extraction state.
//!
//! Harvester threads and the P2P task send [`Sample`]s over one bounded
//! channel; the mixer thread drains it and runs [`Mixer::ingest`] for each,
//! so absorption order is the channel's arrival order. Per sample:
//!
//! 1. health tests (rejects are counted on the source record, never absorbed)
//! 2. pool absorption and quality update
//! 3. staging and extraction, harvester samples only
//! 4. fan-out of each new block to the export buffer, the broadcast queue and
//!    any task waiting for seed material

use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, broadcast};
use zeroize::Zeroize;

use crate::conditioning::EXTRACTED_BLOCK_BYTES;
use crate::eventlog::EventLog;
use crate::extractor::{EXTRACTION_THRESHOLD, ExportBuffer, Extractor};
use crate::health::{self, HealthVerdict};
use crate::pool::{AbsorbDomain, EntropyPool};
use crate::quality::{QualityAnalyzer, SourceKey};
use crate::source::HarvesterId;

/// Capacity of the harvester → mixer channel.
pub const SAMPLE_QUEUE: usize = 1024;

/// Capacity of the whitened-block broadcast queue.
pub const BLOCK_QUEUE: usize = 256;

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Harvester(HarvesterId),
    Peer(SocketAddr),
}

impl Origin {
    pub fn key(self) -> SourceKey {
        match self {
            Self::Harvester(id) => SourceKey::Harvester(id),
            Self::Peer(_) => SourceKey::Peers,
        }
    }

    fn domain(self) -> AbsorbDomain {
        match self {
            Self::Harvester(_) => AbsorbDomain::Harvester,
            Self::Peer(_) => AbsorbDomain::Peer,
        }
    }
}

/// One raw reading on its way to the pool.
#[derive(Debug, Clone)]
pub struct Sample {
    pub origin: Origin,
    pub bytes: Vec<u8>,
}

/// A freshly extracted block, as published to network consumers.
///
/// Consumers never send `block` itself; they derive a labeled copy with
/// [`crate::conditioning::derive_labeled`].
#[derive(Clone)]
pub struct WhitenedBlock {
    pub seq: u64,
    pub block: [u8; EXTRACTED_BLOCK_BYTES],
    pub source: HarvesterId,
    pub raw_shannon: f64,
    pub min_entropy: f64,
}

impl std::fmt::Debug for WhitenedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitenedBlock")
            .field("seq", &self.seq)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Pool, extractor and quality state, shared with metrics readers.
#[derive(Debug)]
pub struct MixerCore {
    pub pool: EntropyPool,
    pub extractor: Extractor,
    pub quality: QualityAnalyzer,
}

impl MixerCore {
    pub fn new(seed: Option<&[u8]>) -> Self {
        Self {
            pool: EntropyPool::new(seed),
            extractor: Extractor::new(),
            quality: QualityAnalyzer::new(),
        }
    }
}

/// What one [`Mixer::ingest`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Rejected(HealthVerdict),
    Absorbed {
        /// Sequence numbers of the blocks this sample triggered.
        extracted: Vec<u64>,
        /// Per-source min-entropy after the sample.
        min_entropy: f64,
    },
}

/// Handles shared by the mixer and the engine.
#[derive(Clone)]
pub struct MixerHandles {
    pub core: Arc<Mutex<MixerCore>>,
    pub export: Arc<Mutex<ExportBuffer>>,
    pub blocks: broadcast::Sender<WhitenedBlock>,
    pub extracted: Arc<Notify>,
    pub log: EventLog,
}

impl MixerHandles {
    pub fn new(seed: Option<&[u8]>, log: EventLog) -> Self {
        let (blocks, _) = broadcast::channel(BLOCK_QUEUE);
        Self {
            core: Arc::new(Mutex::new(MixerCore::new(seed))),
            export: Arc::new(Mutex::new(ExportBuffer::new())),
            blocks,
            extracted: Arc::new(Notify::new()),
            log,
        }
    }

    pub fn lock_core(&self) -> MutexGuard<'_, MixerCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock_export(&self) -> MutexGuard<'_, ExportBuffer> {
        self.export.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The absorption path.
pub struct Mixer {
    handles: MixerHandles,
    health_checks: bool,
}

impl Mixer {
    pub fn new(handles: MixerHandles, health_checks: bool) -> Self {
        Self {
            handles,
            health_checks,
        }
    }

    /// Absorb one sample and run any extraction it makes possible.
    pub fn ingest(&self, mut sample: Sample) -> IngestOutcome {
        let key = sample.origin.key();

        let mut new_blocks = Vec::new();
        let outcome = {
            let mut core = self.handles.lock_core();

            if self.health_checks {
                let verdict = health::check(&sample.bytes);
                if !verdict.passed() {
                    core.quality.reject(key);
                    drop(core);
                    self.log_rejection(key, verdict);
                    sample.bytes.zeroize();
                    return IngestOutcome::Rejected(verdict);
                }
            } else if sample.bytes.is_empty() {
                return IngestOutcome::Rejected(HealthVerdict::Empty);
            }

            let MixerCore {
                pool,
                extractor,
                quality,
            } = &mut *core;

            pool.absorb(sample.origin.domain(), &sample.bytes);
            let q = quality.observe(key, &sample.bytes).clone();
            pool.record_reading(quality.current_shannon());

            let mut extracted = Vec::new();
            if let Origin::Harvester(id) = sample.origin {
                extractor.stage(&sample.bytes);
                let base = extractor.extractions_count();
                for (i, block) in extractor.extract_ready(pool.digest()).into_iter().enumerate() {
                    let seq = base + i as u64;
                    extracted.push(seq);
                    new_blocks.push(WhitenedBlock {
                        seq,
                        block,
                        source: id,
                        raw_shannon: q.raw_shannon,
                        min_entropy: q.min_entropy,
                    });
                }
            }
            IngestOutcome::Absorbed {
                extracted,
                min_entropy: q.min_entropy,
            }
        };
        sample.bytes.zeroize();

        if !new_blocks.is_empty() {
            self.publish(&new_blocks);
        }
        outcome
    }

    fn publish(&self, blocks: &[WhitenedBlock]) {
        {
            let mut export = self.handles.lock_export();
            for b in blocks.iter() {
                export.push(&b.block);
            }
        }
        for b in blocks.iter() {
            self.handles.log.info(format!(
                "EXTRACT #{} | {}→{} bytes | H={:.2} Hmin={:.2} ({})",
                b.seq + 1,
                EXTRACTION_THRESHOLD,
                EXTRACTED_BLOCK_BYTES,
                b.raw_shannon,
                b.min_entropy,
                b.source,
            ));
            // No receivers is fine: network consumers may be disabled.
            let _ = self.handles.blocks.send(b.clone());
        }
        self.handles.extracted.notify_waiters();
    }

    fn log_rejection(&self, key: SourceKey, verdict: HealthVerdict) {
        let why = match verdict {
            HealthVerdict::RepetitionFailure(run) => format!("repetition run {run}"),
            HealthVerdict::ProportionFailure(pct) => format!("one byte value at {pct}%"),
            HealthVerdict::Empty => "empty sample".to_string(),
            HealthVerdict::Pass => return,
        };
        self.handles
            .log
            .warn(format!("HEALTH {key} | sample rejected: {why}"));
    }
}

/// Mixer thread body: ingest until every sender is gone.
///
/// `on_absorbed` sees each successful outcome; the engine uses it for the
/// auto-mint policy.
pub fn run(mixer: Mixer, rx: Receiver<Sample>, mut on_absorbed: impl FnMut(&IngestOutcome)) {
    while let Ok(sample) = rx.recv() {
        let outcome = mixer.ingest(sample);
        if matches!(outcome, IngestOutcome::Absorbed { .. }) {
            on_absorbed(&outcome);
        }
    }
    log::debug!("mixer channel closed");
}
