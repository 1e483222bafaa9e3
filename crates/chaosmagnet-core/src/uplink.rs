//! Streams whitened output to one upstream collector over HTTP.
//!
//! Every cycle the task drains the block broadcast queue, then, if the
//! uplink is enabled, POSTs everything pending to `http://<target>/ingest`
//! as one JSON document. A failed POST keeps its blocks for the next cycle
//! (bounded, oldest dropped). Settings are re-read from the watch channel
//! each cycle, so a disable or retarget applies before the next send.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha3::{Digest, Sha3_256};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::conditioning::derive_labeled;
use crate::config::NetworkConfig;
use crate::error::{EngineError, Result};
use crate::eventlog::EventLog;
use crate::mixer::WhitenedBlock;

/// Blocks held for the collector while it is unreachable.
pub const MAX_PENDING_BLOCKS: usize = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Uplink counters.
#[derive(Debug, Default)]
pub struct UplinkStats {
    pub posts_ok: AtomicU64,
    pub posts_failed: AtomicU64,
    pub blocks_sent: AtomicU64,
    /// Blocks lost to a lagging broadcast receiver or a full pending list.
    pub blocks_dropped: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct UplinkMetrics {
    pub size: usize,
    pub blocks: usize,
}

/// JSON body of one POST.
#[derive(Debug, Serialize)]
pub struct UplinkPayload {
    pub node: String,
    pub seq: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub ts_epoch: f64,
    pub entropy_estimate_raw_shannon: f64,
    pub entropy_estimate_raw_min: f64,
    pub health: &'static str,
    pub source: String,
    pub metrics: UplinkMetrics,
    pub payload_hex: String,
    /// SHA3-256 of the payload bytes, hex.
    pub digest: String,
}

impl UplinkPayload {
    /// Build the body for `blocks`. Only labeled copies are sent.
    pub fn build(node: &str, seq: u64, blocks: &[WhitenedBlock]) -> Self {
        let mut payload = Vec::with_capacity(blocks.len() * 32);
        for b in blocks {
            payload.extend_from_slice(&derive_labeled(b"net", &b.block));
        }
        let digest = hex::encode(Sha3_256::digest(&payload));

        let last = blocks.last();
        let source = match blocks.first() {
            Some(first) if blocks.iter().all(|b| b.source == first.source) => {
                first.source.to_string()
            }
            Some(_) => "MIXED".to_string(),
            None => String::new(),
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Self {
            node: node.to_string(),
            seq,
            timestamp: now.as_secs(),
            ts_epoch: now.as_secs_f64(),
            entropy_estimate_raw_shannon: last.map_or(0.0, |b| b.raw_shannon),
            entropy_estimate_raw_min: last.map_or(0.0, |b| b.min_entropy),
            health: "OK",
            source,
            metrics: UplinkMetrics {
                size: payload.len(),
                blocks: blocks.len(),
            },
            payload_hex: hex::encode(&payload),
            digest,
        }
    }
}

/// Build the HTTP client up front so a TLS backend problem surfaces at start.
pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| EngineError::Network(e.to_string()))
}

fn drain(
    rx: &mut broadcast::Receiver<WhitenedBlock>,
    pending: &mut VecDeque<WhitenedBlock>,
    stats: &UplinkStats,
) {
    loop {
        match rx.try_recv() {
            Ok(block) => {
                if pending.len() == MAX_PENDING_BLOCKS {
                    pending.pop_front();
                    stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                }
                pending.push_back(block);
            }
            Err(TryRecvError::Lagged(n)) => {
                stats.blocks_dropped.fetch_add(n, Ordering::Relaxed);
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

/// Everything the uplink task needs.
pub struct UplinkTask {
    pub node: String,
    pub interval: Duration,
    pub client: reqwest::Client,
    pub config: watch::Receiver<NetworkConfig>,
    pub blocks: broadcast::Receiver<WhitenedBlock>,
    pub stats: Arc<UplinkStats>,
    pub log: EventLog,
    pub cancel: CancellationToken,
}

impl UplinkTask {
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending: VecDeque<WhitenedBlock> = VecDeque::new();
        let mut seq = 0u64;
        let mut failing = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            drain(&mut self.blocks, &mut pending, &self.stats);
            let cfg = self.config.borrow_and_update().clone();
            if !cfg.uplink_enabled {
                pending.clear();
                failing = false;
                continue;
            }
            if pending.is_empty() {
                continue;
            }

            let batch: Vec<WhitenedBlock> = pending.iter().cloned().collect();
            let body = UplinkPayload::build(&self.node, seq, &batch);
            let url = format!("http://{}/ingest", cfg.target);

            let sent = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = self.client.post(&url).json(&body).send() => r,
            };
            let outcome = match sent {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(format!("HTTP {}", resp.status())),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => {
                    seq += 1;
                    self.stats.posts_ok.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .blocks_sent
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    pending.clear();
                    if failing {
                        self.log.info(format!("UPLINK restored to {}", cfg.target));
                        failing = false;
                    }
                }
                Err(why) => {
                    self.stats.posts_failed.fetch_add(1, Ordering::Relaxed);
                    if !failing {
                        self.log
                            .warn(format!("UPLINK to {} failed: {why}; retrying", cfg.target));
                        failing = true;
                    } else {
                        log::debug!("uplink retry failed: {why}");
                    }
                }
            }
        }
        log::debug!("uplink task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::HarvesterId;

    fn block(seq: u64, source: HarvesterId) -> WhitenedBlock {
        WhitenedBlock {
            seq,
            block: [seq as u8; 32],
            source,
            raw_shannon: 7.5,
            min_entropy: 6.0,
        }
    }

    #[test]
    fn payload_carries_labeled_copies_only() {
        let blocks = vec![block(0, HarvesterId::Trng), block(1, HarvesterId::Trng)];
        let body = UplinkPayload::build("node-a", 3, &blocks);
        assert_eq!(body.seq, 3);
        assert_eq!(body.source, "TRNG");
        assert_eq!(body.metrics.blocks, 2);
        assert_eq!(body.metrics.size, 64);
        assert_eq!(body.payload_hex.len(), 128);
        assert!(!body.payload_hex.contains(&hex::encode(blocks[0].block)));

        let payload = hex::decode(&body.payload_hex).unwrap();
        assert_eq!(body.digest, hex::encode(Sha3_256::digest(&payload)));
    }

    #[test]
    fn payload_marks_mixed_sources() {
        let blocks = vec![block(0, HarvesterId::Trng), block(1, HarvesterId::Audio)];
        assert_eq!(UplinkPayload::build("n", 0, &blocks).source, "MIXED");
    }

    #[test]
    fn payload_serializes_expected_fields() {
        let body = UplinkPayload::build("n", 0, &[block(0, HarvesterId::System)]);
        let json = serde_json::to_value(&body).unwrap();
        for field in [
            "node",
            "seq",
            "timestamp",
            "ts_epoch",
            "entropy_estimate_raw_shannon",
            "entropy_estimate_raw_min",
            "health",
            "source",
            "metrics",
            "payload_hex",
            "digest",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn drain_bounds_pending() {
        let (tx, mut rx) = broadcast::channel(256);
        for i in 0..(MAX_PENDING_BLOCKS as u64 + 10) {
            tx.send(block(i, HarvesterId::Video)).unwrap();
        }
        let stats = UplinkStats::default();
        let mut pending = VecDeque::new();
        drain(&mut rx, &mut pending, &stats);
        assert_eq!(pending.len(), MAX_PENDING_BLOCKS);
        assert_eq!(pending.front().unwrap().seq, 10);
        assert_eq!(stats.blocks_dropped.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn disabled_uplink_sends_nothing_and_stops_on_cancel() {
        let (_cfg_tx, cfg_rx) = watch::channel(NetworkConfig {
            uplink_enabled: false,
            // Nothing listens here; a send attempt would count as a failure.
            target: "127.0.0.1:9".into(),
        });
        let (tx, rx) = broadcast::channel(16);
        let stats = Arc::new(UplinkStats::default());
        let cancel = CancellationToken::new();
        let task = UplinkTask {
            node: "n".into(),
            interval: Duration::from_millis(10),
            client: client().unwrap(),
            config: cfg_rx,
            blocks: rx,
            stats: Arc::clone(&stats),
            log: EventLog::new(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        tx.send(block(0, HarvesterId::Trng)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(stats.posts_ok.load(Ordering::Relaxed), 0);
        assert_eq!(stats.posts_failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn failed_posts_are_logged_once_and_retried() {
        // Bind then drop, so the port is very likely closed.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (_cfg_tx, cfg_rx) = watch::channel(NetworkConfig {
            uplink_enabled: true,
            target: format!("127.0.0.1:{port}"),
        });
        let (tx, rx) = broadcast::channel(16);
        let stats = Arc::new(UplinkStats::default());
        let log = EventLog::new();
        let cancel = CancellationToken::new();
        let task = UplinkTask {
            node: "n".into(),
            interval: Duration::from_millis(20),
            client: client().unwrap(),
            config: cfg_rx,
            blocks: rx,
            stats: Arc::clone(&stats),
            log: log.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        tx.send(block(0, HarvesterId::Trng)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(stats.posts_failed.load(Ordering::Relaxed) >= 2);
        let warnings = log.lines().iter().filter(|l| l.contains("UPLINK")).count();
        assert_eq!(warnings, 1);
    }
}
