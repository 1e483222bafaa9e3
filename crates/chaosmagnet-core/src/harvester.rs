//! Background sampling loop around one [`EntropySource`].
//!
//! Each harvester owns one OS thread for the life of the engine. While
//! enabled, the thread collects `sample_size` bytes every `cadence` and hands
//! them to the mixer with a non-blocking send: a full queue drops the sample
//! rather than stalling the source. While disabled it idles and releases any
//! device the source holds. Availability is probed once, at construction.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::mixer::{Origin, Sample};
use crate::source::{EntropySource, HarvesterId};

/// Longest uninterrupted sleep, so stop and toggles are seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Counters kept by the harvester thread.
#[derive(Debug, Default)]
pub struct HarvesterStats {
    pub samples_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Cycles where the source had nothing to give.
    pub idle_cycles: AtomicU64,
    /// Samples dropped because the mixer queue was full.
    pub dropped: AtomicU64,
    /// Collections that panicked.
    pub failures: AtomicU64,
}

struct Shared {
    source: Box<dyn EntropySource>,
    enabled: AtomicBool,
    stop: AtomicBool,
    stats: HarvesterStats,
}

/// One harvesting channel.
pub struct Harvester {
    id: HarvesterId,
    available: bool,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Harvester {
    /// Wrap `source`, probing availability once.
    pub fn new(source: Box<dyn EntropySource>) -> Self {
        let id = source.id();
        let available = catch_unwind(AssertUnwindSafe(|| source.is_available())).unwrap_or(false);
        Self {
            id,
            available,
            shared: Arc::new(Shared {
                source,
                enabled: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                stats: HarvesterStats::default(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn id(&self) -> HarvesterId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.shared.source.name()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &HarvesterStats {
        &self.shared.stats
    }

    /// Begin producing samples. Fails without side effects when the source
    /// is unavailable on this machine.
    pub fn start(&self) -> Result<()> {
        if !self.available {
            return Err(EngineError::Configuration(format!(
                "harvester {} is not available on this machine",
                self.id
            )));
        }
        self.shared.enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Halt production. Quality statistics are kept.
    pub fn stop(&self) {
        self.shared.enabled.store(false, Ordering::Release);
    }

    /// Spawn the sampling thread. Unavailable harvesters never get one.
    pub fn spawn(&self, tx: SyncSender<Sample>) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let id = self.id;
        let handle = thread::Builder::new()
            .name(format!("chaosmagnet-{}", id.as_str().to_lowercase()))
            .spawn(move || run(id, &shared, tx))
            .map_err(|e| EngineError::Configuration(format!("cannot spawn {id} harvester: {e}")))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Ask the thread to exit; does not wait.
    pub fn signal_shutdown(&self) {
        self.shared.enabled.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Wait for the thread to exit. Call after [`Harvester::signal_shutdown`].
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("{} harvester thread panicked", self.id);
            }
        }
    }
}

/// Sleep up to `total`, waking early on stop or a disable.
fn nap(shared: &Shared, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        if shared.stop.load(Ordering::Acquire) || !shared.enabled.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

fn run(id: HarvesterId, shared: &Shared, tx: SyncSender<Sample>) {
    let info = shared.source.info();
    let mut holding_device = false;
    log::debug!("{id} harvester thread up ({})", info.name);

    while !shared.stop.load(Ordering::Acquire) {
        if !shared.enabled.load(Ordering::Acquire) {
            if holding_device {
                shared.source.release();
                holding_device = false;
            }
            thread::sleep(SLEEP_SLICE);
            continue;
        }
        holding_device = true;

        let collected = catch_unwind(AssertUnwindSafe(|| shared.source.collect(info.sample_size)));
        match collected {
            Ok(bytes) if !bytes.is_empty() => {
                let len = bytes.len() as u64;
                match tx.try_send(Sample {
                    origin: Origin::Harvester(id),
                    bytes,
                }) {
                    Ok(()) => {
                        shared.stats.samples_sent.fetch_add(1, Ordering::Relaxed);
                        shared.stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(_) => {
                shared.stats.idle_cycles.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                shared.stats.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("{id} source panicked during collection");
            }
        }

        nap(shared, info.cadence);
    }

    shared.source.release();
    log::debug!("{id} harvester thread down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Platform, SourceCategory, SourceInfo};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::sync_channel;

    struct CountingSource {
        info: SourceInfo,
        available: bool,
        releases: Arc<AtomicUsize>,
    }

    impl CountingSource {
        fn new(available: bool) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    info: SourceInfo {
                        id: HarvesterId::System,
                        name: "counting",
                        description: "test source",
                        physics: "none",
                        category: SourceCategory::Timing,
                        platform: Platform::Any,
                        requirements: &[],
                        cadence: Duration::from_millis(5),
                        sample_size: 16,
                    },
                    available,
                    releases: Arc::clone(&releases),
                },
                releases,
            )
        }
    }

    impl EntropySource for CountingSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn collect(&self, n: usize) -> Vec<u8> {
            (0..n as u8).collect()
        }
        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unavailable_cannot_start() {
        let (src, _) = CountingSource::new(false);
        let h = Harvester::new(Box::new(src));
        assert!(!h.is_available());
        let err = h.start().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(!h.is_enabled());
    }

    #[test]
    fn produces_only_while_enabled() {
        let (src, releases) = CountingSource::new(true);
        let h = Harvester::new(Box::new(src));
        let (tx, rx) = sync_channel(64);
        h.spawn(tx).unwrap();

        thread::sleep(Duration::from_millis(40));
        assert!(rx.try_recv().is_err(), "disabled harvester produced");

        h.start().unwrap();
        let sample = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sample.origin, Origin::Harvester(HarvesterId::System));
        assert_eq!(sample.bytes.len(), 16);

        h.stop();
        thread::sleep(Duration::from_millis(60));
        assert!(releases.load(Ordering::SeqCst) >= 1);

        h.signal_shutdown();
        h.join();
        assert!(h.stats().samples_sent.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn full_queue_drops_samples() {
        let (src, _) = CountingSource::new(true);
        let h = Harvester::new(Box::new(src));
        let (tx, rx) = sync_channel(1);
        h.spawn(tx).unwrap();
        h.start().unwrap();
        thread::sleep(Duration::from_millis(80));
        h.signal_shutdown();
        h.join();
        assert!(h.stats().dropped.load(Ordering::Relaxed) >= 1);
        drop(rx);
    }
}
