//! # chaosmagnet-core
//!
//! **Five noisy channels in, post-quantum keys out.**
//!
//! `chaosmagnet-core` harvests raw entropy from five independent channels
//! (OS/CPU jitter, the hardware RNG, microphone noise, camera sensor noise and
//! pointer input), mixes it through a SHA3-512 sponge pool, extracts whitened
//! 32-byte blocks, streams them to a collector and to UDP peers, and mints
//! ML-KEM-768 + ML-DSA-65 key bundles from them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chaosmagnet_core::{Engine, EngineConfig, HarvesterId};
//!
//! # async fn demo() -> chaosmagnet_core::Result<()> {
//! let engine = Engine::start(EngineConfig::default())?;
//! engine.toggle_harvester(HarvesterId::System, true)?;
//!
//! let confirmation = engine.mint_pqc_bundle("alice").await?;
//! println!("{confirmation}");
//!
//! let metrics = engine.get_metrics();
//! println!("{} bytes absorbed, {} extractions", metrics.total_bytes, metrics.extractions_count);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Harvesters (threads) → bounded channel → Mixer (one thread: health tests,
//! pool absorption, quality, extraction) → export buffer / broadcast queue →
//! Uplink, P2P, Vault
//!
//! Every source implements the [`EntropySource`] trait. Peer datagrams enter
//! the same channel and strengthen the pool, but only harvester bytes count
//! toward an extraction.

pub mod address;
pub mod conditioning;
pub mod config;
pub mod engine;
pub mod error;
pub mod eventlog;
pub mod extractor;
pub mod harvester;
pub mod health;
pub mod metrics;
pub mod mixer;
pub mod p2p;
pub mod pool;
pub mod quality;
pub mod source;
pub mod sources;
pub mod uplink;
pub mod vault;

pub use config::{AutoMintPolicy, EngineConfig, NetworkConfig, P2pConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use eventlog::EventLog;
pub use metrics::{HarvesterStatus, MetricsSnapshot};
pub use quality::{SourceKey, SourceQuality};
pub use source::{EntropySource, HarvesterId, Platform, Requirement, SourceCategory, SourceInfo};
pub use vault::{BundleSummary, KeyBundle, PublicBundle, Vault};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
