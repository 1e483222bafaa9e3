//! Best-effort entropy gossip between nodes over UDP.
//!
//! Each datagram is one JSON object `{node, seq, payload_hex}` carrying
//! 16–512 payload bytes. Outgoing payloads are labeled copies of freshly
//! extracted blocks, sent once per cycle to every configured peer. Incoming
//! datagrams from anyone are decoded, rate limited per source IP, health
//! tested and handed to the mixer as peer samples. Peer bytes strengthen the
//! pool but never trigger an extraction on their own.
//!
//! The task follows the live [`P2pConfig`]: it binds when enabled, rebinds
//! when the port changes and closes the socket when disabled.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::conditioning::{EXTRACTED_BLOCK_BYTES, derive_labeled};
use crate::config::P2pConfig;
use crate::eventlog::EventLog;
use crate::health;
use crate::mixer::{Origin, Sample, WhitenedBlock};

pub const MIN_PAYLOAD: usize = 16;
pub const MAX_PAYLOAD: usize = 512;

/// Receive buffer; anything longer is truncated and fails to decode.
const MAX_DATAGRAM: usize = 2048;

/// Idle token buckets are forgotten after this long.
const BUCKET_IDLE: Duration = Duration::from_secs(60);

/// Wire form of one datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub node: String,
    pub seq: u64,
    pub payload_hex: String,
}

/// Why an incoming datagram was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    Malformed,
    BadHex,
    Size(usize),
}

impl Datagram {
    pub fn new(node: &str, seq: u64, payload: &[u8]) -> Self {
        Self {
            node: node.to_string(),
            seq,
            payload_hex: hex::encode(payload),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse and validate raw bytes, returning the payload.
    pub fn decode(raw: &[u8]) -> Result<(Self, Vec<u8>), DatagramError> {
        let dg: Datagram = serde_json::from_slice(raw).map_err(|_| DatagramError::Malformed)?;
        let payload = hex::decode(&dg.payload_hex).map_err(|_| DatagramError::BadHex)?;
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
            return Err(DatagramError::Size(payload.len()));
        }
        Ok((dg, payload))
    }
}

/// Byte-rate limiter for one peer.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// `rate` bytes per second, with one second of burst.
    pub fn new(rate: usize, now: Instant) -> Self {
        let rate = rate as f64;
        Self {
            rate,
            capacity: rate,
            tokens: rate,
            last: now,
        }
    }

    pub fn try_take(&mut self, n: usize, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
        if self.tokens >= n as f64 {
            self.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    fn idle_since(&self) -> Instant {
        self.last
    }
}

/// P2P counters. `received` is the reported `p2p_received_count`.
#[derive(Debug, Default)]
pub struct P2pStats {
    pub received: AtomicU64,
    pub sent: AtomicU64,
    pub rejected: AtomicU64,
    pub rate_limited: AtomicU64,
}

/// Everything the P2P task needs.
pub struct P2pTask {
    pub node: String,
    pub interval: Duration,
    pub rate_limit: usize,
    pub health_checks: bool,
    pub config: watch::Receiver<P2pConfig>,
    pub blocks: broadcast::Receiver<WhitenedBlock>,
    pub samples: SyncSender<Sample>,
    pub stats: Arc<P2pStats>,
    pub log: EventLog,
    pub cancel: CancellationToken,
}

async fn recv_from(
    socket: &Option<UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(s) => s.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

impl P2pTask {
    pub async fn run(mut self) {
        let mut socket: Option<UdpSocket> = None;
        let mut bound_port: Option<u16> = None;
        let mut failed_port: Option<u16> = None;
        let mut buckets: HashMap<IpAddr, TokenBucket> = HashMap::new();
        let mut outgoing: VecDeque<[u8; EXTRACTED_BLOCK_BYTES]> = VecDeque::new();
        let mut seq = 0u64;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let cfg = self.config.borrow_and_update().clone();
            self.reconcile(&cfg, &mut socket, &mut bound_port, &mut failed_port)
                .await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.config.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.collect_outgoing(cfg.enabled, &mut outgoing);
                    if let Some(s) = socket.as_ref() {
                        if !outgoing.is_empty() && !cfg.peers.is_empty() {
                            let payload: Vec<u8> = outgoing.drain(..).flatten().collect();
                            let dg = Datagram::new(&self.node, seq, &payload).encode();
                            seq += 1;
                            for peer in &cfg.peers {
                                match s.send_to(&dg, peer).await {
                                    Ok(_) => {
                                        self.stats.sent.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(e) => log::warn!("P2P send to {peer} failed: {e}"),
                                }
                            }
                        }
                    }
                    let now = Instant::now();
                    buckets.retain(|_, b| now.duration_since(b.idle_since()) < BUCKET_IDLE);
                }
                res = recv_from(&socket, &mut buf) => {
                    match res {
                        Ok((n, from)) => self.accept(&buf[..n], from, &mut buckets),
                        Err(e) => log::debug!("P2P receive error: {e}"),
                    }
                }
            }
        }
        drop(socket);
        log::debug!("P2P task stopped");
    }

    /// Make the socket match `cfg`.
    async fn reconcile(
        &self,
        cfg: &P2pConfig,
        socket: &mut Option<UdpSocket>,
        bound_port: &mut Option<u16>,
        failed_port: &mut Option<u16>,
    ) {
        if !cfg.enabled {
            if socket.take().is_some() {
                self.log.info("P2P listener closed");
            }
            *bound_port = None;
            *failed_port = None;
            return;
        }
        if *bound_port == Some(cfg.port) {
            return;
        }
        socket.take();
        *bound_port = None;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cfg.port);
        match UdpSocket::bind(addr).await {
            Ok(s) => {
                *socket = Some(s);
                *bound_port = Some(cfg.port);
                *failed_port = None;
                self.log.info(format!(
                    "P2P listening on UDP {} ({} peers)",
                    cfg.port,
                    cfg.peers.len()
                ));
            }
            Err(e) => {
                if *failed_port != Some(cfg.port) {
                    self.log
                        .error(format!("P2P bind on UDP {} failed: {e}; retrying", cfg.port));
                    *failed_port = Some(cfg.port);
                }
            }
        }
    }

    /// Pull new blocks off the broadcast queue as labeled copies.
    fn collect_outgoing(&mut self, enabled: bool, out: &mut VecDeque<[u8; EXTRACTED_BLOCK_BYTES]>) {
        let max_blocks = MAX_PAYLOAD / EXTRACTED_BLOCK_BYTES;
        loop {
            match self.blocks.try_recv() {
                Ok(b) if enabled => {
                    if out.len() == max_blocks {
                        out.pop_front();
                    }
                    out.push_back(derive_labeled(b"p2p", &b.block));
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if !enabled {
            out.clear();
        }
    }

    fn accept(&self, raw: &[u8], from: SocketAddr, buckets: &mut HashMap<IpAddr, TokenBucket>) {
        let (dg, payload) = match Datagram::decode(raw) {
            Ok(ok) => ok,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("P2P datagram from {from} refused: {e:?}");
                return;
            }
        };

        let now = Instant::now();
        let bucket = buckets
            .entry(from.ip())
            .or_insert_with(|| TokenBucket::new(self.rate_limit, now));
        if !bucket.try_take(payload.len(), now) {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            log::debug!("P2P datagram from {from} rate limited");
            return;
        }

        if self.health_checks && !health::check(&payload).passed() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            self.log
                .warn(format!("P2P datagram from {from} ({}) failed health tests", dg.node));
            return;
        }

        let len = payload.len();
        match self.samples.try_send(Sample {
            origin: Origin::Peer(from),
            bytes: payload,
        }) {
            Ok(()) => {
                let n = self.stats.received.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("P2P absorbed {len} bytes from {from} (#{n})");
            }
            Err(TrySendError::Full(_)) => {
                log::debug!("P2P sample from {from} dropped: mixer busy");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
