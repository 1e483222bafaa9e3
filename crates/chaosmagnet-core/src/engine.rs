//! The engine context: owns harvesters, the mixer thread, the network tasks
//! and the vault, and exposes the control surface.
//!
//! There is no global instance. Each [`Engine`] is independent, so tests and
//! embedders can run several side by side. Control calls validate first and
//! change nothing on error; every error is also written to the event log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use zeroize::Zeroizing;

use crate::address;
use crate::config::{AutoMintPolicy, EngineConfig, NetworkConfig, P2pConfig, validate_owner_label};
use crate::error::{EngineError, Result};
use crate::eventlog::EventLog;
use crate::harvester::Harvester;
use crate::metrics::{HarvesterStatus, MetricsSnapshot};
use crate::mixer::{self, IngestOutcome, Mixer, MixerHandles, SAMPLE_QUEUE, Sample};
use crate::p2p::{P2pStats, P2pTask};
use crate::source::{EntropySource, HarvesterId};
use crate::sources;
use crate::uplink::{self, UplinkStats, UplinkTask};
use crate::vault::{
    BundleSummary, KEM_ALGORITHM, KeyBundle, MINT_SEED_BYTES, SIGNATURE_ALGORITHM, Vault,
};

/// Background workers, torn down once by [`Engine::shutdown`].
#[derive(Default)]
struct Workers {
    tasks: Vec<JoinHandle<()>>,
    mixer: Option<thread::JoinHandle<()>>,
    sample_tx: Option<SyncSender<Sample>>,
}

/// A running harvesting engine.
pub struct Engine {
    config: EngineConfig,
    harvesters: Arc<BTreeMap<HarvesterId, Harvester>>,
    handles: MixerHandles,
    log: EventLog,
    vault: Vault,
    network: watch::Sender<NetworkConfig>,
    p2p: watch::Sender<P2pConfig>,
    uplink_stats: Arc<UplinkStats>,
    p2p_stats: Arc<P2pStats>,
    stopped: AtomicBool,
    cancel: CancellationToken,
    mints: TaskTracker,
    workers: tokio::sync::Mutex<Workers>,
}

impl Engine {
    /// Start with the five built-in sources.
    ///
    /// Must be called from within a tokio runtime; the network tasks run on it.
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::start_with_sources(config, sources::all_sources())
    }

    /// Start with an explicit source set. A harvester slot with no source is
    /// reported unavailable.
    pub fn start_with_sources(
        config: EngineConfig,
        sources: Vec<Box<dyn EntropySource>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            EngineError::Configuration("the engine must be started inside a tokio runtime".into())
        })?;
        let (net_cfg, p2p_cfg) = config.live_settings()?;
        let client = uplink::client()?;

        let mut harvesters = BTreeMap::new();
        for source in sources {
            let id = source.id();
            if harvesters.contains_key(&id) {
                return Err(EngineError::Configuration(format!(
                    "more than one source for harvester {id}"
                )));
            }
            harvesters.insert(id, Harvester::new(source));
        }
        let harvesters = Arc::new(harvesters);

        let log = EventLog::new();
        let handles = MixerHandles::new(None, log.clone());
        let vault = Vault::new(config.vault_dir.clone());
        let cancel = CancellationToken::new();
        let mints = TaskTracker::new();
        let (sample_tx, sample_rx) = sync_channel::<Sample>(SAMPLE_QUEUE);

        let mixer = Mixer::new(handles.clone(), config.health_checks);
        let mut auto_mint = config.auto_mint.clone().map(|policy| AutoMinter {
            policy,
            vault: vault.clone(),
            handles: handles.clone(),
            runtime: runtime.clone(),
            tracker: mints.clone(),
            cancel: cancel.clone(),
        });
        let mixer_thread = thread::Builder::new()
            .name("chaosmagnet-mixer".into())
            .spawn(move || {
                mixer::run(mixer, sample_rx, |outcome| {
                    if let Some(auto) = auto_mint.as_mut() {
                        auto.on_absorbed(outcome);
                    }
                })
            })
            .map_err(|e| EngineError::Configuration(format!("cannot spawn mixer thread: {e}")))?;

        if let Err(e) = harvesters.values().try_for_each(|h| h.spawn(sample_tx.clone())) {
            for h in harvesters.values() {
                h.signal_shutdown();
                h.join();
            }
            drop(sample_tx);
            let _ = mixer_thread.join();
            return Err(e);
        }

        let (network, net_rx) = watch::channel(net_cfg);
        let (p2p, p2p_rx) = watch::channel(p2p_cfg);
        let uplink_stats = Arc::new(UplinkStats::default());
        let p2p_stats = Arc::new(P2pStats::default());

        let uplink_task = UplinkTask {
            node: config.node_name.clone(),
            interval: config.uplink_interval,
            client,
            config: net_rx,
            blocks: handles.blocks.subscribe(),
            stats: Arc::clone(&uplink_stats),
            log: log.clone(),
            cancel: cancel.clone(),
        };
        let p2p_task = P2pTask {
            node: config.node_name.clone(),
            interval: config.p2p_interval,
            rate_limit: config.peer_rate_limit,
            health_checks: config.health_checks,
            config: p2p_rx,
            blocks: handles.blocks.subscribe(),
            samples: sample_tx.clone(),
            stats: Arc::clone(&p2p_stats),
            log: log.clone(),
            cancel: cancel.clone(),
        };
        let tasks = vec![runtime.spawn(uplink_task.run()), runtime.spawn(p2p_task.run())];

        let engine = Self {
            config,
            harvesters,
            handles,
            log,
            vault,
            network,
            p2p,
            uplink_stats,
            p2p_stats,
            stopped: AtomicBool::new(false),
            cancel,
            mints,
            workers: tokio::sync::Mutex::new(Workers {
                tasks,
                mixer: Some(mixer_thread),
                sample_tx: Some(sample_tx),
            }),
        };

        for id in engine.config.enabled_harvesters.clone() {
            if let Err(e) = engine.toggle_harvester(id, true) {
                log::debug!("initial enable of {id} skipped: {e}");
            }
        }
        let available = engine.harvesters.values().filter(|h| h.is_available()).count();
        engine.log.info(format!(
            "Engine '{}' started: {available}/{} harvesters available, vault {}",
            engine.config.node_name,
            HarvesterId::ALL.len(),
            if engine.vault.is_ready() { "ready" } else { "unavailable" },
        ));
        Ok(engine)
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn harvester(&self, id: HarvesterId) -> Option<&Harvester> {
        self.harvesters.get(&id)
    }

    pub fn uplink_stats(&self) -> &UplinkStats {
        &self.uplink_stats
    }

    pub fn p2p_stats(&self) -> &P2pStats {
        &self.p2p_stats
    }

    /// Log an error into the ring and hand it back.
    fn logged<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.log.error(e.to_string());
        }
        result
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::Stopped)
        }
    }

    /// Enable or disable one harvester. Enabling an unavailable harvester is a
    /// configuration error and leaves it disabled.
    pub fn toggle_harvester(&self, id: HarvesterId, enabled: bool) -> Result<()> {
        self.ensure_running()?;
        let result = match self.harvesters.get(&id) {
            None if enabled => Err(EngineError::Configuration(format!(
                "harvester {id} is not available on this machine"
            ))),
            None => Ok(()),
            Some(h) if enabled => {
                let was = h.is_enabled();
                h.start().map(|()| {
                    if !was {
                        self.log.info(format!("HARVESTER {id} enabled ({})", h.name()));
                    }
                })
            }
            Some(h) => {
                if h.is_enabled() {
                    h.stop();
                    self.log.info(format!("HARVESTER {id} disabled"));
                }
                Ok(())
            }
        };
        self.logged(result)
    }

    pub fn toggle_uplink(&self, enabled: bool) -> Result<()> {
        self.ensure_running()?;
        let changed = self.network.send_if_modified(|c| {
            let changed = c.uplink_enabled != enabled;
            c.uplink_enabled = enabled;
            changed
        });
        if changed {
            let target = self.network.borrow().target.clone();
            if enabled {
                self.log.info(format!("UPLINK enabled → {target}"));
            } else {
                self.log.info("UPLINK disabled");
            }
        }
        Ok(())
    }

    /// Retarget the uplink. Takes effect from the next send.
    pub fn set_network_target(&self, address: &str) -> Result<()> {
        self.ensure_running()?;
        let target = self.logged(address::normalize_target(address))?;
        let changed = self.network.send_if_modified(|c| {
            let changed = c.target != target;
            c.target = target.clone();
            changed
        });
        if changed {
            self.log.info(format!("UPLINK target set to {target}"));
        }
        Ok(())
    }

    pub fn toggle_p2p(&self, enabled: bool) -> Result<()> {
        self.ensure_running()?;
        let changed = self.p2p.send_if_modified(|c| {
            let changed = c.enabled != enabled;
            c.enabled = enabled;
            changed
        });
        if changed {
            let port = self.p2p.borrow().port;
            if enabled {
                self.log.info(format!("P2P enabled on UDP {port}"));
            } else {
                self.log.info("P2P disabled");
            }
        }
        Ok(())
    }

    /// Change the P2P listen port (1024–65535). An active listener rebinds.
    pub fn set_p2p_port(&self, port: u32) -> Result<()> {
        self.ensure_running()?;
        let port = self.logged(address::validate_p2p_port(port))?;
        let changed = self.p2p.send_if_modified(|c| {
            let changed = c.port != port;
            c.port = port;
            changed
        });
        if changed {
            self.log.info(format!("P2P port set to {port}"));
        }
        Ok(())
    }

    /// Add a peer. Adding a known peer again is a no-op.
    pub fn add_peer(&self, address: &str) -> Result<()> {
        self.ensure_running()?;
        let peer = self.logged(address::normalize_peer(address))?;
        if self.p2p.send_if_modified(|c| c.peers.insert(peer)) {
            self.log.info(format!("P2P peer added: {peer}"));
        }
        Ok(())
    }

    /// Take 64 whitened bytes, waiting up to the mint timeout for them.
    async fn wait_for_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.mint_timeout;
        loop {
            // Register before checking so an extraction in between is not missed.
            let notified = self.handles.extracted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = self.handles.lock_export().take(MINT_SEED_BYTES);
            if let Some(seed) = taken {
                return Ok(Zeroizing::new(seed));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => return Err(EngineError::Stopped),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(EngineError::InsufficientEntropy {
                        needed: MINT_SEED_BYTES,
                        available: self.handles.lock_export().len(),
                        waited_ms: started.elapsed().as_millis(),
                    });
                }
            }
        }
    }

    /// Mint and persist an ML-KEM-768 + ML-DSA-65 bundle seeded from 64
    /// whitened bytes. Returns a confirmation line containing the bundle id.
    pub async fn mint_pqc_bundle(&self, owner_label: &str) -> Result<String> {
        self.ensure_running()?;
        let owner = self.logged(validate_owner_label(owner_label))?.to_string();
        let seed = self.logged(self.wait_for_seed().await)?;

        let vault = self.vault.clone();
        let label = owner.clone();
        let minted = tokio::task::spawn_blocking(move || vault.mint(&label, &seed))
            .await
            .map_err(|e| EngineError::Persistence(format!("mint task failed: {e}")))
            .and_then(|r| r);
        let bundle = self.logged(minted)?;

        let msg = format!(
            "Minted bundle {} for '{owner}' ({KEM_ALGORITHM} + {SIGNATURE_ALGORITHM})",
            bundle.id
        );
        self.log.info(format!("VAULT | {msg}"));
        Ok(msg)
    }

    pub fn list_bundles(&self) -> Result<Vec<BundleSummary>> {
        self.vault.list()
    }

    pub fn load_bundle(&self, id: &str) -> Result<KeyBundle> {
        self.vault.load(id)
    }

    /// Current snapshot. Callable at any time, including after shutdown.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let running = self.is_running();
        let net = self.network.borrow().clone();
        let p2p = self.p2p.borrow().clone();

        let harvesters = HarvesterId::ALL
            .iter()
            .map(|id| {
                let h = self.harvesters.get(id);
                let status = HarvesterStatus {
                    enabled: h.is_some_and(Harvester::is_enabled),
                    available: h.is_some_and(Harvester::is_available),
                };
                (id.to_string(), status)
            })
            .collect();

        let export_available = self.handles.lock_export().len();
        let core = self.handles.lock_core();
        let source_quality = core
            .quality
            .breakdown()
            .map(|(key, q)| (key.to_string(), q.clone()))
            .collect();

        MetricsSnapshot {
            history_raw: core.pool.history_raw(),
            history_whitened: core.extractor.history_whitened(),
            total_bytes: core.pool.total_bytes(),
            current_raw_entropy: core.quality.current_shannon(),
            current_whitened_entropy: core.extractor.current_whitened_entropy(),
            estimated_true_bits: core.quality.estimated_true_bits(),
            pool_hex: core.pool.snapshot_hex(),
            extraction_pool_fill: core.extractor.fill_percent(),
            extraction_pool_accumulated: core.extractor.accumulated(),
            extractions_count: core.extractor.extractions_count(),
            total_raw_consumed: core.extractor.total_raw_consumed(),
            total_extracted_bytes: core.extractor.total_extracted_bytes(),
            extraction_ratio: core.extractor.ratio(),
            source_quality,
            harvesters,
            net_mode: running && net.uplink_enabled,
            uplink_target: net.target,
            p2p_active: running && p2p.enabled,
            p2p_port: p2p.port,
            p2p_peer_count: p2p.peers.len(),
            p2p_received_count: self.p2p_stats.received.load(Ordering::Relaxed),
            pqc_ready: self.vault.is_ready(),
            export_available,
            logs: self.log.lines(),
        }
    }

    /// Stop everything and wait for every thread and task to exit. Pending
    /// staging and export bytes are wiped. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cancel.cancel();

        let mut workers = self.workers.lock().await;
        let Some(mixer_thread) = workers.mixer.take() else {
            return;
        };

        for h in self.harvesters.values() {
            h.signal_shutdown();
        }
        let harvesters = Arc::clone(&self.harvesters);
        let joined = tokio::task::spawn_blocking(move || {
            for h in harvesters.values() {
                h.join();
            }
        })
        .await;
        if let Err(e) = joined {
            log::warn!("harvester join failed: {e}");
        }

        for task in workers.tasks.drain(..) {
            if let Err(e) = task.await {
                log::warn!("background task ended abnormally: {e}");
            }
        }

        // Last sender gone: the mixer drains what is queued and exits.
        workers.sample_tx.take();
        match tokio::task::spawn_blocking(move || mixer_thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => log::warn!("mixer thread panicked"),
            Err(e) => log::warn!("mixer join failed: {e}"),
        }

        // Only the mixer spawns auto-mints, and it has exited.
        self.mints.close();
        self.mints.wait().await;

        self.handles.lock_core().extractor.clear();
        self.handles.lock_export().clear();
        self.log.info("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Without an explicit shutdown, at least stop the threads and tasks.
        self.stopped.store(true, Ordering::Release);
        self.cancel.cancel();
        for h in self.harvesters.values() {
            h.signal_shutdown();
        }
    }
}

/// Mints in the background every N extractions while quality holds.
struct AutoMinter {
    policy: AutoMintPolicy,
    vault: Vault,
    handles: MixerHandles,
    runtime: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl AutoMinter {
    fn on_absorbed(&mut self, outcome: &IngestOutcome) {
        let IngestOutcome::Absorbed {
            extracted,
            min_entropy,
        } = outcome
        else {
            return;
        };
        for seq in extracted {
            if (seq + 1) % self.policy.every_extractions != 0 || self.cancel.is_cancelled() {
                continue;
            }
            if *min_entropy <= self.policy.min_entropy_threshold {
                log::debug!(
                    "auto-mint skipped at extraction {}: Hmin {min_entropy:.2} <= {:.2}",
                    seq + 1,
                    self.policy.min_entropy_threshold
                );
                continue;
            }
            let taken = self.handles.lock_export().take(MINT_SEED_BYTES);
            let Some(seed) = taken else {
                self.handles
                    .log
                    .warn("AUTO-MINT skipped: not enough whitened output buffered");
                continue;
            };
            let seed = Zeroizing::new(seed);
            let vault = self.vault.clone();
            let owner = self.policy.owner_label.clone();
            let log = self.handles.log.clone();
            self.tracker.spawn_blocking_on(
                move || match vault.mint(&owner, &seed) {
                    Ok(bundle) => {
                        log.info(format!("AUTO-MINT | bundle {} for '{owner}'", bundle.id))
                    }
                    Err(e) => log.error(format!("AUTO-MINT failed: {e}")),
                },
                &self.runtime,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Platform, SourceCategory, SourceInfo};
    use std::time::Duration;

    struct ScriptedSource {
        info: SourceInfo,
        available: bool,
        constant: Option<u8>,
    }

    impl ScriptedSource {
        fn new(id: HarvesterId, available: bool, constant: Option<u8>) -> Box<dyn EntropySource> {
            Box::new(Self {
                info: SourceInfo {
                    id,
                    name: "scripted",
                    description: "deterministic test bytes",
                    physics: "none",
                    category: SourceCategory::Hardware,
                    platform: Platform::Any,
                    requirements: &[],
                    cadence: Duration::from_millis(5),
                    sample_size: 128,
                },
                available,
                constant,
            })
        }

        fn boxed(id: HarvesterId, available: bool) -> Box<dyn EntropySource> {
            Self::new(id, available, None)
        }

        fn constant(id: HarvesterId, byte: u8) -> Box<dyn EntropySource> {
            Self::new(id, true, Some(byte))
        }
    }

    impl EntropySource for ScriptedSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn collect(&self, n: usize) -> Vec<u8> {
            if let Some(byte) = self.constant {
                return vec![byte; n];
            }
            let mut out = vec![0u8; n];
            getrandom::fill(&mut out).unwrap();
            out
        }
    }

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            vault_dir: dir.to_path_buf(),
            mint_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_requires_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let bad = EngineConfig {
            p2p_port: 80,
            ..config(dir.path())
        };
        assert!(matches!(
            Engine::start_with_sources(bad, vec![]),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Engine::start_with_sources(config(dir.path()), vec![]),
            Err(EngineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_sources_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            ScriptedSource::boxed(HarvesterId::Trng, true),
            ScriptedSource::boxed(HarvesterId::Trng, true),
        ];
        assert!(Engine::start_with_sources(config(dir.path()), sources).is_err());
    }

    #[tokio::test]
    async fn initial_harvesters_enabled_and_unavailable_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            enabled_harvesters: vec![HarvesterId::Trng, HarvesterId::Video],
            ..config(dir.path())
        };
        let sources = vec![
            ScriptedSource::boxed(HarvesterId::Trng, true),
            ScriptedSource::boxed(HarvesterId::Video, false),
        ];
        let engine = Engine::start_with_sources(cfg, sources).unwrap();
        let m = engine.get_metrics();
        assert!(m.harvesters["TRNG"].enabled);
        assert!(!m.harvesters["VIDEO"].enabled);
        assert!(!m.harvesters["VIDEO"].available);
        assert!(!m.harvesters["AUDIO"].available);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn control_errors_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start_with_sources(config(dir.path()), vec![]).unwrap();
        assert!(engine.set_network_target("").is_err());
        assert!(
            engine
                .event_log()
                .lines()
                .iter()
                .any(|l| l.contains("configuration error"))
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn network_toggles_show_in_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start_with_sources(config(dir.path()), vec![]).unwrap();
        engine.set_network_target("http://10.1.2.3:8080/").unwrap();
        engine.toggle_uplink(true).unwrap();
        let m = engine.get_metrics();
        assert!(m.net_mode);
        assert_eq!(m.uplink_target, "10.1.2.3:8080");
        engine.toggle_uplink(false).unwrap();
        assert!(!engine.get_metrics().net_mode);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn auto_mint_writes_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            enabled_harvesters: vec![HarvesterId::Trng],
            auto_mint: Some(AutoMintPolicy {
                every_extractions: 4,
                min_entropy_threshold: 0.0,
                owner_label: "auto".into(),
            }),
            ..config(dir.path())
        };
        let engine =
            Engine::start_with_sources(cfg, vec![ScriptedSource::boxed(HarvesterId::Trng, true)])
                .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while engine.list_bundles().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.shutdown().await;
        let bundles = engine.list_bundles().unwrap();
        assert!(!bundles.is_empty());
        assert_eq!(bundles[0].owner_label, "auto");
    }

    #[tokio::test]
    async fn auto_mint_respects_min_entropy_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            enabled_harvesters: vec![HarvesterId::Trng],
            health_checks: false,
            auto_mint: Some(AutoMintPolicy {
                every_extractions: 1,
                min_entropy_threshold: 1.0,
                owner_label: "auto".into(),
            }),
            ..config(dir.path())
        };
        let engine =
            Engine::start_with_sources(cfg, vec![ScriptedSource::constant(HarvesterId::Trng, 0)])
                .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while engine.get_metrics().extractions_count < 6 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.shutdown().await;
        assert!(engine.get_metrics().extractions_count >= 6);
        assert!(engine.list_bundles().unwrap().is_empty());
        assert!(!engine.event_log().lines().iter().any(|l| l.contains("AUTO-MINT")));
    }

    #[tokio::test]
    async fn no_auto_mint_lands_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            enabled_harvesters: vec![HarvesterId::Trng],
            auto_mint: Some(AutoMintPolicy {
                every_extractions: 1,
                min_entropy_threshold: 0.0,
                owner_label: "auto".into(),
            }),
            ..config(dir.path())
        };
        let engine =
            Engine::start_with_sources(cfg, vec![ScriptedSource::boxed(HarvesterId::Trng, true)])
                .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while engine.list_bundles().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.shutdown().await;

        let at_shutdown = engine.list_bundles().unwrap().len();
        assert!(at_shutdown > 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.list_bundles().unwrap().len(), at_shutdown);
        let lines = engine.event_log().lines();
        assert!(lines.last().unwrap().contains("Engine stopped"));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_wipes_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            enabled_harvesters: vec![HarvesterId::Trng],
            ..config(dir.path())
        };
        let engine =
            Engine::start_with_sources(cfg, vec![ScriptedSource::boxed(HarvesterId::Trng, true)])
                .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown().await;
        engine.shutdown().await;
        let m = engine.get_metrics();
        assert_eq!(m.extraction_pool_accumulated, 0);
        assert_eq!(m.export_available, 0);
        assert!(!m.harvesters["TRNG"].enabled);
        assert!(!m.p2p_active);
    }
}
