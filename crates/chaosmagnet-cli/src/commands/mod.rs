pub mod mint;
pub mod run;
pub mod scan;
pub mod serve;
pub mod vault;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chaosmagnet_core::address::validate_p2p_port;
use chaosmagnet_core::{AutoMintPolicy, EngineConfig, HarvesterId, Result};

/// Engine options shared by `run`, `serve` and `mint`.
#[derive(clap::Args)]
pub struct EngineArgs {
    /// Node name reported to the collector and peers
    #[arg(long)]
    node: Option<String>,

    /// Directory for minted bundles
    #[arg(long)]
    vault_dir: Option<String>,

    /// Comma-separated harvesters to enable: system,trng,audio,video,mouse or "all"
    #[arg(long, default_value = "system,trng")]
    harvesters: String,

    /// Stream whitened output to the collector
    #[arg(long)]
    uplink: bool,

    /// Collector address, host[:port]
    #[arg(long)]
    uplink_target: Option<String>,

    /// Exchange entropy with peers over UDP
    #[arg(long)]
    p2p: bool,

    /// UDP port for P2P (1024-65535)
    #[arg(long, default_value = "9000")]
    p2p_port: u32,

    /// Peer address, ip[:port]; repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Disable the repetition and proportion tests
    #[arg(long)]
    no_health_checks: bool,

    /// Mint a bundle automatically every N extractions while quality holds
    #[arg(long)]
    auto_mint: Option<u64>,

    /// Seconds a mint waits for seed material
    #[arg(long, default_value = "5")]
    mint_timeout: u64,
}

impl EngineArgs {
    pub fn to_config(&self) -> Result<EngineConfig> {
        let mut cfg = EngineConfig::default().with_env();
        if let Some(node) = &self.node {
            cfg.node_name = node.clone();
        }
        if let Some(dir) = &self.vault_dir {
            cfg.vault_dir = PathBuf::from(dir);
        }
        if let Some(target) = &self.uplink_target {
            cfg.uplink_target = target.clone();
        }
        cfg.enabled_harvesters = parse_harvesters(&self.harvesters)?;
        cfg.uplink_enabled = self.uplink;
        cfg.p2p_enabled = self.p2p;
        cfg.p2p_port = validate_p2p_port(self.p2p_port)?;
        cfg.peers = self.peers.clone();
        cfg.health_checks = !self.no_health_checks;
        cfg.mint_timeout = Duration::from_secs(self.mint_timeout);
        cfg.auto_mint = self.auto_mint.map(|n| AutoMintPolicy {
            every_extractions: n,
            ..Default::default()
        });
        Ok(cfg)
    }
}

fn parse_harvesters(list: &str) -> Result<Vec<HarvesterId>> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(HarvesterId::ALL.to_vec());
    }
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Print an error and exit with status 1.
pub fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {e}");
    std::process::exit(1);
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| fail(format!("cannot start runtime: {e}")))
}

/// Flag cleared by Ctrl+C.
pub fn running_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .unwrap_or_else(|e| fail(format!("cannot set Ctrl+C handler: {e}")));
    running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvester_lists() {
        assert_eq!(
            parse_harvesters("system, TRNG").unwrap(),
            vec![HarvesterId::System, HarvesterId::Trng]
        );
        assert_eq!(parse_harvesters("all").unwrap().len(), 5);
        assert!(parse_harvesters("system,radio").is_err());
        assert!(parse_harvesters("").unwrap().is_empty());
    }
}
