//! Causal clock: per-peer counters plus a deterministic digest.
//!
//! The head is a SHA-256 over the canonical encoding of the sorted state, so two
//! clocks holding the same `(peer, counter)` pairs always agree on their head no
//! matter how they got there. Heads let peers test equality without shipping the
//! whole state; the full state is still needed to order non-equal clocks.
//!
//! The state only grows: one entry per peer ever observed. Once it exceeds the
//! configured threshold a warning is logged, since pruning requires an epoch
//! agreement between peers that this crate does not implement.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sorted map of peer id to logical counter.
pub type ClockState = BTreeMap<String, u64>;

/// Relationship between two clock states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalOrder {
    /// Identical states.
    Equal,
    /// Local happened before remote.
    Before,
    /// Local happened after remote.
    After,
    /// Neither dominates.
    Concurrent,
}

impl fmt::Display for CausalOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "equal",
            Self::Before => "before",
            Self::After => "after",
            Self::Concurrent => "concurrent",
        };
        f.write_str(s)
    }
}

/// Compute the head of a state.
///
/// Each entry is encoded as a big-endian `u32` id length, the id bytes and a
/// big-endian `u64` counter, in peer-id order.
pub fn compute_head(state: &ClockState) -> String {
    let mut hasher = Sha256::new();
    for (peer, counter) in state {
        let len = u32::try_from(peer.len()).unwrap_or(u32::MAX);
        hasher.update(len.to_be_bytes());
        hasher.update(peer.as_bytes());
        hasher.update(counter.to_be_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Vector clock owned by one peer.
#[derive(Debug, Clone)]
pub struct CausalClock {
    local_peer: String,
    state: ClockState,
    head: String,
    growth_warn_threshold: usize,
    growth_warned: bool,
}

impl CausalClock {
    /// Default number of tracked peers before a growth warning.
    pub const DEFAULT_GROWTH_WARN_THRESHOLD: usize = 1024;

    /// Create a clock for `local_peer` with its counter at zero.
    pub fn new(local_peer: impl Into<String>) -> Self {
        Self::with_growth_threshold(local_peer, Self::DEFAULT_GROWTH_WARN_THRESHOLD)
    }

    /// Create a clock with a custom growth warning threshold.
    pub fn with_growth_threshold(local_peer: impl Into<String>, threshold: usize) -> Self {
        let local_peer = local_peer.into();
        let mut state = ClockState::new();
        state.insert(local_peer.clone(), 0);
        let head = compute_head(&state);
        Self {
            local_peer,
            state,
            head,
            growth_warn_threshold: threshold,
            growth_warned: false,
        }
    }

    /// Increment the local counter and return its new value.
    pub fn tick(&mut self) -> u64 {
        let counter = self.state.entry(self.local_peer.clone()).or_insert(0);
        *counter += 1;
        let value = *counter;
        self.head = compute_head(&self.state);
        value
    }

    /// Pointwise maximum with `remote`.
    pub fn merge(&mut self, remote: &ClockState) {
        for (peer, &counter) in remote {
            let entry = self.state.entry(peer.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
        self.head = compute_head(&self.state);
        self.check_growth();
    }

    /// Compare against a remote head and state.
    pub fn compare(&self, remote_head: &str, remote_state: &ClockState) -> CausalOrder {
        if self.head == remote_head {
            return CausalOrder::Equal;
        }
        compare_states(&self.state, remote_state)
    }

    /// Current head.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// Current state.
    pub const fn state(&self) -> &ClockState {
        &self.state
    }

    /// Counter for `peer`, 0 if never observed.
    pub fn counter(&self, peer: &str) -> u64 {
        self.state.get(peer).copied().unwrap_or(0)
    }

    /// Peer owning this clock.
    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    /// Number of peers tracked.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Never true; the local peer is always tracked.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    fn check_growth(&mut self) {
        if !self.growth_warned && self.state.len() > self.growth_warn_threshold {
            self.growth_warned = true;
            tracing::warn!(
                peers = self.state.len(),
                threshold = self.growth_warn_threshold,
                "causal clock state keeps growing; consider epoch-based pruning"
            );
        }
    }
}

/// Order two states by pointwise dominance. Missing entries count as zero.
pub fn compare_states(local: &ClockState, remote: &ClockState) -> CausalOrder {
    let mut local_ahead = false;
    let mut remote_ahead = false;
    for peer in local.keys().chain(remote.keys()) {
        let l = local.get(peer).copied().unwrap_or(0);
        let r = remote.get(peer).copied().unwrap_or(0);
        if l > r {
            local_ahead = true;
        } else if r > l {
            remote_ahead = true;
        }
    }
    match (local_ahead, remote_ahead) {
        (false, false) => CausalOrder::Equal,
        (true, false) => CausalOrder::After,
        (false, true) => CausalOrder::Before,
        (true, true) => CausalOrder::Concurrent,
    }
}
