//! Point-in-time view of the engine.
//!
//! A snapshot is assembled from short, separate lock acquisitions, so it may
//! straddle an absorption, but each field is individually consistent and
//! reading never blocks the mixer for longer than a copy.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::quality::SourceQuality;

/// Enabled/available flags for one harvester slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarvesterStatus {
    pub enabled: bool,
    pub available: bool,
}

/// Everything `get_metrics` reports.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Pool-wide raw Shannon readings, oldest first (at most 200).
    pub history_raw: Vec<f64>,
    /// Shannon over recent whitened output, one reading per extraction.
    pub history_whitened: Vec<f64>,
    pub total_bytes: u64,
    pub current_raw_entropy: f64,
    pub current_whitened_entropy: f64,
    /// Σ min-entropy × length over all accepted samples.
    pub estimated_true_bits: f64,
    /// Upper-case hex of the 64-byte pool state.
    pub pool_hex: String,
    /// Staging fill, 0–100.
    pub extraction_pool_fill: f64,
    pub extraction_pool_accumulated: usize,
    pub extractions_count: u64,
    pub total_raw_consumed: u64,
    pub total_extracted_bytes: u64,
    /// `total_raw_consumed / total_extracted_bytes`, 0 before any extraction.
    pub extraction_ratio: f64,
    /// Per source name (`TRNG`, `AUDIO`, ..., `P2P`).
    pub source_quality: BTreeMap<String, SourceQuality>,
    pub harvesters: BTreeMap<String, HarvesterStatus>,
    /// Uplink enabled.
    pub net_mode: bool,
    pub uplink_target: String,
    pub p2p_active: bool,
    pub p2p_port: u16,
    pub p2p_peer_count: usize,
    pub p2p_received_count: u64,
    /// Vault directory is present and writable.
    pub pqc_ready: bool,
    /// Whitened bytes waiting in the export buffer.
    pub export_available: usize,
    pub logs: Vec<String>,
}

impl MetricsSnapshot {
    /// Serialize for an external boundary.
    pub fn to_json(&self) -> serde_json::Value {
        // Every field is a plain number, string, bool or map of those.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
