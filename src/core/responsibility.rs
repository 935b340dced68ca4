//! Coordination-free responsibility assignment.
//!
//! Every identifier is hashed to a fixed-width bit vector. The peer whose vector
//! has the smallest Hamming distance to a task's vector executes that task; ties
//! go to the lexicographically smallest raw peer id. The computation is pure, so
//! peers that share a view of the membership agree without exchanging messages.
//! Peers with diverging views may both claim a task, which callers must tolerate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{CoordinationError, Result};

/// Default network-wide bit width.
pub const DEFAULT_NORMALIZATION_BITS: usize = 160;

/// Fixed-width bit vector derived from a raw identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedId {
    bits: usize,
    #[serde(with = "crate::util::serde::hex_bytes")]
    bytes: Vec<u8>,
}

impl NormalizedId {
    /// Wrap raw bytes as a vector of `bits` bits.
    ///
    /// # Errors
    ///
    /// `Validation` when `bytes` is not exactly `ceil(bits / 8)` long.
    pub fn from_bytes(bytes: Vec<u8>, bits: usize) -> Result<Self> {
        if bits == 0 || bytes.len() != bits.div_ceil(8) {
            return Err(CoordinationError::Validation(format!(
                "{} bytes cannot hold a {bits}-bit identifier",
                bytes.len()
            )));
        }
        let mut id = Self { bits, bytes };
        id.mask_tail();
        Ok(id)
    }

    /// Width in bits.
    pub const fn bits(&self) -> usize {
        self.bits
    }

    /// Underlying bytes; unused tail bits are zero.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn mask_tail(&mut self) {
        let rem = self.bits % 8;
        if rem != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFFu8 << (8 - rem);
            }
        }
    }
}

impl fmt::Display for NormalizedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", hex::encode(&self.bytes), self.bits)
    }
}

/// Hash function used for normalization.
pub trait IdHasher: Send + Sync {
    /// Digest of a raw identifier. Output may be any length; it is extended or
    /// truncated to the configured width.
    fn digest(&self, raw: &[u8]) -> Vec<u8>;
}

/// SHA-256 normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256IdHasher;

impl IdHasher for Sha256IdHasher {
    fn digest(&self, raw: &[u8]) -> Vec<u8> {
        Sha256::digest(raw).to_vec()
    }
}

/// Count differing bits between two equal-width vectors.
///
/// # Errors
///
/// `Validation` when the widths differ.
pub fn hamming_distance(a: &NormalizedId, b: &NormalizedId) -> Result<u32> {
    if a.bits != b.bits || a.bytes.len() != b.bytes.len() {
        return Err(CoordinationError::Validation(format!(
            "hamming distance needs equal widths, got {} and {} bits",
            a.bits, b.bits
        )));
    }
    Ok(a.bytes
        .iter()
        .zip(&b.bytes)
        .map(|(x, y)| (x ^ y).count_ones())
        .sum())
}

/// Stateless responsibility computation over normalized identifiers.
#[derive(Clone)]
pub struct ResponsibilityAssigner {
    bits: usize,
    hasher: Arc<dyn IdHasher>,
}

impl ResponsibilityAssigner {
    /// SHA-256 based assigner with the given network-wide width.
    pub fn new(bits: usize) -> Self {
        Self::with_hasher(bits, Arc::new(Sha256IdHasher))
    }

    /// Assigner with a custom hash function.
    pub fn with_hasher(bits: usize, hasher: Arc<dyn IdHasher>) -> Self {
        Self {
            bits: bits.max(1),
            hasher,
        }
    }

    /// Configured width in bits.
    pub const fn bits(&self) -> usize {
        self.bits
    }

    /// Hash `id` and fit the digest to the configured width.
    ///
    /// Digests shorter than the width are extended by hashing the previous block
    /// again; longer ones are truncated.
    pub fn normalize(&self, id: &str) -> NormalizedId {
        let want = self.bits.div_ceil(8);
        let mut block = self.hasher.digest(id.as_bytes());
        let mut bytes = Vec::with_capacity(want);
        while bytes.len() < want {
            if block.is_empty() {
                bytes.resize(want, 0);
                break;
            }
            bytes.extend_from_slice(&block);
            block = self.hasher.digest(&block);
        }
        bytes.truncate(want);
        let mut normalized = NormalizedId {
            bits: self.bits,
            bytes,
        };
        normalized.mask_tail();
        normalized
    }

    /// Distance from `peer_id` to `target`.
    ///
    /// # Errors
    ///
    /// `Validation` when `target` has a different width.
    pub fn distance(&self, peer_id: &str, target: &NormalizedId) -> Result<u32> {
        hamming_distance(&self.normalize(peer_id), target)
    }

    /// The peer that should execute `target` among `peers`.
    ///
    /// Smallest distance wins, ties go to the smallest raw id. Returns `None` for
    /// an empty peer list.
    ///
    /// # Errors
    ///
    /// `Validation` when `target` has a different width.
    pub fn responsible_peer<'a, I>(&self, target: &NormalizedId, peers: I) -> Result<Option<&'a str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(u32, &'a str)> = None;
        for peer in peers {
            let candidate = (self.distance(peer, target)?, peer);
            if best.is_none_or(|current| candidate < current) {
                best = Some(candidate);
            }
        }
        Ok(best.map(|(_, peer)| peer))
    }

    /// Whether `self_id` wins `target` among `known_peer_ids` plus itself.
    ///
    /// A width mismatch means the announcement came from a differently configured
    /// network; it is logged and treated as not responsible.
    pub fn is_responsible(
        &self,
        self_id: &str,
        target: &NormalizedId,
        known_peer_ids: &[String],
    ) -> bool {
        let candidates = std::iter::once(self_id).chain(known_peer_ids.iter().map(String::as_str));
        match self.responsible_peer(target, candidates) {
            Ok(winner) => winner == Some(self_id),
            Err(err) => {
                tracing::warn!(error = %err, "cannot evaluate responsibility");
                false
            }
        }
    }
}

impl fmt::Debug for ResponsibilityAssigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsibilityAssigner")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl Default for ResponsibilityAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZATION_BITS)
    }
}
