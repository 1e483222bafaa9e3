//! SHA3-512 chaining sponge that every absorbed byte flows through.
//!
//! Each absorption replaces the 64-byte state with
//!
//! ```text
//! SHA3-512( state[64] || counter_le[8] || domain || len_le[8] || bytes )
//! ```
//!
//! so every byte ever absorbed influences all later states, and the ordering
//! of absorptions is part of the state. The pool is owned by the mixer thread;
//! nothing else writes to it.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use sha3::{Digest, Sha3_512};
use zeroize::Zeroize;

/// Size of the sponge state in bytes.
pub const POOL_STATE_BYTES: usize = 64;

/// Raw Shannon readings kept in `history_raw`.
pub const HISTORY_LEN: usize = 200;

/// Which channel an absorption came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsorbDomain {
    Harvester,
    Peer,
}

impl AbsorbDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            Self::Harvester => b"chaosmagnet/pool/harvester",
            Self::Peer => b"chaosmagnet/pool/peer",
        }
    }
}

/// The mixing pool.
pub struct EntropyPool {
    state: [u8; POOL_STATE_BYTES],
    counter: u64,
    total_bytes: u64,
    history_raw: VecDeque<f64>,
}

impl EntropyPool {
    /// Create a pool. With no seed the state starts from OS randomness and
    /// the wall clock; a fixed seed gives a reproducible pool for tests.
    pub fn new(seed: Option<&[u8]>) -> Self {
        let mut h = Sha3_512::new();
        h.update(b"chaosmagnet/pool/init");
        match seed {
            Some(s) => h.update(s),
            None => {
                let mut os_random = [0u8; 64];
                if let Err(e) = getrandom::fill(&mut os_random) {
                    log::warn!("OS randomness unavailable for pool seeding: {e}");
                }
                h.update(os_random);
                os_random.zeroize();
                let ts = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                h.update(ts.as_nanos().to_le_bytes());
            }
        }
        let mut state = [0u8; POOL_STATE_BYTES];
        state.copy_from_slice(&h.finalize());
        Self {
            state,
            counter: 0,
            total_bytes: 0,
            history_raw: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    /// Mix `bytes` into the state. Empty input is a no-op.
    pub fn absorb(&mut self, domain: AbsorbDomain, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.counter = self.counter.wrapping_add(1);
        let mut h = Sha3_512::new();
        h.update(self.state);
        h.update(self.counter.to_le_bytes());
        h.update(domain.tag());
        h.update((bytes.len() as u64).to_le_bytes());
        h.update(bytes);
        self.state.copy_from_slice(&h.finalize());
        self.total_bytes += bytes.len() as u64;
    }

    /// Current state, for the extractor. Never leaves the engine.
    pub(crate) fn digest(&self) -> &[u8; POOL_STATE_BYTES] {
        &self.state
    }

    /// Upper-case hex rendering of the state; does not disturb it.
    pub fn snapshot_hex(&self) -> String {
        hex::encode_upper(self.state)
    }

    /// Total bytes ever absorbed, harvester and peer alike.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of absorptions performed.
    pub fn absorptions(&self) -> u64 {
        self.counter
    }

    /// Record one pool-wide Shannon reading, oldest dropped first.
    pub fn record_reading(&mut self, shannon: f64) {
        if self.history_raw.len() == HISTORY_LEN {
            self.history_raw.pop_front();
        }
        self.history_raw.push_back(shannon.clamp(0.0, 8.0));
    }

    pub fn history_raw(&self) -> Vec<f64> {
        self.history_raw.iter().copied().collect()
    }
}

impl Drop for EntropyPool {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

impl std::fmt::Debug for EntropyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyPool")
            .field("absorptions", &self.counter)
            .field("total_bytes", &self.total_bytes)
            .field("history_len", &self.history_raw.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_changes_state_and_counts() {
        let mut pool = EntropyPool::new(Some(b"seed"));
        let before = pool.snapshot_hex();
        pool.absorb(AbsorbDomain::Harvester, &[1, 2, 3]);
        assert_ne!(before, pool.snapshot_hex());
        assert_eq!(pool.total_bytes(), 3);
        assert_eq!(pool.absorptions(), 1);
    }

    #[test]
    fn test_empty_absorb_is_noop() {
        let mut pool = EntropyPool::new(Some(b"seed"));
        let before = pool.snapshot_hex();
        pool.absorb(AbsorbDomain::Harvester, &[]);
        assert_eq!(before, pool.snapshot_hex());
        assert_eq!(pool.absorptions(), 0);
    }

    #[test]
    fn test_seeded_pools_are_reproducible() {
        let mut a = EntropyPool::new(Some(b"same"));
        let mut b = EntropyPool::new(Some(b"same"));
        a.absorb(AbsorbDomain::Harvester, b"xyz");
        b.absorb(AbsorbDomain::Harvester, b"xyz");
        assert_eq!(a.snapshot_hex(), b.snapshot_hex());
    }

    #[test]
    fn test_domain_and_order_matter() {
        let mut a = EntropyPool::new(Some(b"s"));
        let mut b = EntropyPool::new(Some(b"s"));
        a.absorb(AbsorbDomain::Harvester, b"data");
        b.absorb(AbsorbDomain::Peer, b"data");
        assert_ne!(a.snapshot_hex(), b.snapshot_hex());

        let mut c = EntropyPool::new(Some(b"s"));
        let mut d = EntropyPool::new(Some(b"s"));
        c.absorb(AbsorbDomain::Harvester, b"ab");
        c.absorb(AbsorbDomain::Harvester, b"cd");
        d.absorb(AbsorbDomain::Harvester, b"cd");
        d.absorb(AbsorbDomain::Harvester, b"ab");
        assert_ne!(c.snapshot_hex(), d.snapshot_hex());
    }

    #[test]
    fn test_unseeded_pools_differ() {
        let a = EntropyPool::new(None);
        let b = EntropyPool::new(None);
        assert_ne!(a.snapshot_hex(), b.snapshot_hex());
    }

    #[test]
    fn test_snapshot_is_uppercase_hex() {
        let pool = EntropyPool::new(Some(b"x"));
        let hex = pool.snapshot_hex();
        assert_eq!(hex.len(), POOL_STATE_BYTES * 2);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut pool = EntropyPool::new(Some(b"x"));
        for i in 0..(HISTORY_LEN + 50) {
            pool.record_reading(i as f64 / 100.0);
        }
        let h = pool.history_raw();
        assert_eq!(h.len(), HISTORY_LEN);
        assert!((h[0] - 0.5).abs() < 1e-12);
        pool.record_reading(42.0);
        assert_eq!(*pool.history_raw().last().unwrap(), 8.0);
    }
}
