//! Engine configuration and the live network/P2P settings.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::address::{self, DEFAULT_P2P_PORT};
use crate::error::{EngineError, Result};
use crate::source::HarvesterId;

/// Longest owner label accepted by the vault.
pub const MAX_OWNER_LABEL: usize = 64;

/// Mint a bundle automatically while extraction quality stays high.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoMintPolicy {
    /// Mint on every Nth extraction.
    pub every_extractions: u64,
    /// Only when the triggering source's min-entropy exceeds this (bits/byte).
    pub min_entropy_threshold: f64,
    /// Owner label written into auto-minted bundles.
    pub owner_label: String,
}

impl Default for AutoMintPolicy {
    fn default() -> Self {
        Self {
            every_extractions: 10,
            min_entropy_threshold: 6.5,
            owner_label: "auto".to_string(),
        }
    }
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Node name reported in uplink payloads and P2P datagrams.
    pub node_name: String,
    /// Directory holding one JSON document per key bundle.
    pub vault_dir: PathBuf,
    /// Longest a mint waits for seed material.
    pub mint_timeout: Duration,
    pub uplink_enabled: bool,
    /// Collector address, `host:port` or bare host.
    pub uplink_target: String,
    pub uplink_interval: Duration,
    pub p2p_enabled: bool,
    pub p2p_port: u16,
    pub p2p_interval: Duration,
    pub peers: Vec<String>,
    /// Bytes per second accepted from any one peer.
    pub peer_rate_limit: usize,
    /// Harvesters switched on at start. Unavailable ones are skipped with a log line.
    pub enabled_harvesters: Vec<HarvesterId>,
    /// Run the repetition and proportion tests on every sample.
    pub health_checks: bool,
    pub auto_mint: Option<AutoMintPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_name: "chaosmagnet".to_string(),
            vault_dir: PathBuf::from("keys"),
            mint_timeout: Duration::from_secs(5),
            uplink_enabled: false,
            uplink_target: "127.0.0.1:8000".to_string(),
            uplink_interval: Duration::from_secs(1),
            p2p_enabled: false,
            p2p_port: DEFAULT_P2P_PORT,
            p2p_interval: Duration::from_secs(1),
            peers: Vec::new(),
            peer_rate_limit: 1024,
            enabled_harvesters: Vec::new(),
            health_checks: true,
            auto_mint: None,
        }
    }
}

impl EngineConfig {
    /// Apply `CHAOSMAGNET_NODE`, `CHAOSMAGNET_VAULT_DIR` and
    /// `CHAOSMAGNET_UPLINK_TARGET` when set.
    pub fn with_env(mut self) -> Self {
        use crate::sources::helpers::env_override;
        if let Some(node) = env_override("CHAOSMAGNET_NODE") {
            self.node_name = node;
        }
        if let Some(dir) = env_override("CHAOSMAGNET_VAULT_DIR") {
            self.vault_dir = PathBuf::from(dir);
        }
        if let Some(target) = env_override("CHAOSMAGNET_UPLINK_TARGET") {
            self.uplink_target = target;
        }
        self
    }

    /// Validate and split into the live network and P2P settings.
    pub fn live_settings(&self) -> Result<(NetworkConfig, P2pConfig)> {
        let target = address::normalize_target(&self.uplink_target)?;
        let port = address::validate_p2p_port(self.p2p_port as u32)?;
        let peers = self
            .peers
            .iter()
            .map(|p| address::normalize_peer(p))
            .collect::<Result<BTreeSet<_>>>()?;
        if self.uplink_interval.is_zero() || self.p2p_interval.is_zero() {
            return Err(EngineError::Configuration(
                "uplink and P2P intervals must be non-zero".into(),
            ));
        }
        if self.peer_rate_limit == 0 {
            return Err(EngineError::Configuration(
                "peer rate limit must be non-zero".into(),
            ));
        }
        if let Some(policy) = &self.auto_mint {
            if policy.every_extractions == 0 {
                return Err(EngineError::Configuration(
                    "auto-mint interval must be at least one extraction".into(),
                ));
            }
            validate_owner_label(&policy.owner_label)?;
        }
        Ok((
            NetworkConfig {
                uplink_enabled: self.uplink_enabled,
                target,
            },
            P2pConfig {
                enabled: self.p2p_enabled,
                port,
                peers,
            },
        ))
    }
}

/// Check a bundle owner label: non-empty, at most 64 characters, no control
/// characters.
pub fn validate_owner_label(label: &str) -> Result<&str> {
    let label = label.trim();
    if label.is_empty() {
        return Err(EngineError::Configuration("owner label is empty".into()));
    }
    if label.chars().count() > MAX_OWNER_LABEL {
        return Err(EngineError::Configuration(format!(
            "owner label longer than {MAX_OWNER_LABEL} characters"
        )));
    }
    if label.chars().any(char::is_control) {
        return Err(EngineError::Configuration(
            "owner label contains control characters".into(),
        ));
    }
    Ok(label)
}

/// Live uplink settings, re-read by the uplink task every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    pub uplink_enabled: bool,
    /// Normalized `host:port`.
    pub target: String,
}

/// Live P2P settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct P2pConfig {
    pub enabled: bool,
    pub port: u16,
    pub peers: BTreeSet<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        let (net, p2p) = cfg.live_settings().unwrap();
        assert!(!net.uplink_enabled);
        assert_eq!(net.target, "127.0.0.1:8000");
        assert!(!p2p.enabled);
        assert_eq!(p2p.port, 9000);
        assert!(p2p.peers.is_empty());
        assert!(cfg.auto_mint.is_none());
    }

    #[test]
    fn peers_are_deduplicated() {
        let cfg = EngineConfig {
            peers: vec!["10.0.0.5".into(), "10.0.0.5:9000".into()],
            ..Default::default()
        };
        let (_, p2p) = cfg.live_settings().unwrap();
        assert_eq!(p2p.peers.len(), 1);
    }

    #[test]
    fn invalid_settings_rejected() {
        let bad_port = EngineConfig {
            p2p_port: 80,
            ..Default::default()
        };
        assert!(bad_port.live_settings().is_err());

        let bad_target = EngineConfig {
            uplink_target: "/".into(),
            ..Default::default()
        };
        assert!(bad_target.live_settings().is_err());

        let bad_policy = EngineConfig {
            auto_mint: Some(AutoMintPolicy {
                every_extractions: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(bad_policy.live_settings().is_err());
    }

    #[test]
    fn owner_labels() {
        assert_eq!(validate_owner_label("  alice ").unwrap(), "alice");
        assert!(validate_owner_label("").is_err());
        assert!(validate_owner_label(&"x".repeat(65)).is_err());
        assert!(validate_owner_label("a\nb").is_err());
        assert!(validate_owner_label(&"é".repeat(64)).is_ok());
    }
}
