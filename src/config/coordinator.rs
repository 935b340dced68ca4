//! Coordinator configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::clock::CausalClock;
use crate::core::responsibility::DEFAULT_NORMALIZATION_BITS;

/// Prefix for environment variables read by [`CoordinatorConfig::from_env`].
pub const ENV_PREFIX: &str = "PEER_SCHED_";

const fn default_normalization_bits() -> usize {
    DEFAULT_NORMALIZATION_BITS
}

const fn default_task_timeout_ms() -> u64 {
    2_000
}

const fn default_max_reannounce_attempts() -> u32 {
    2
}

const fn default_reannounce_backoff_ms() -> u64 {
    250
}

const fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

const fn default_retention_ms() -> u64 {
    60_000
}

const fn default_clock_growth_warn_threshold() -> usize {
    CausalClock::DEFAULT_GROWTH_WARN_THRESHOLD
}

/// Settings for one coordinator (one peer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// This peer's raw identifier.
    pub peer_id: String,
    /// Network-wide normalized id width in bits. Every peer must agree.
    #[serde(default = "default_normalization_bits")]
    pub normalization_bits: usize,
    /// How long an originator waits for a completion before timing out.
    ///
    /// Each announcement attempt gets this long. With re-announcements enabled
    /// the task only fails after [`failure_deadline`](Self::failure_deadline);
    /// under the defaults (2000 ms, 2 re-announcements, 250 ms base backoff)
    /// that is 6750 ms, and until then the task reports `RemotelyExecuting`.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Re-announcements after the first timeout before failing the task.
    #[serde(default = "default_max_reannounce_attempts")]
    pub max_reannounce_attempts: u32,
    /// Base backoff before a re-announcement, doubled per attempt.
    #[serde(default = "default_reannounce_backoff_ms")]
    pub reannounce_backoff_ms: u64,
    /// Heartbeat period; peers silent for three periods leave the view.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Peers always considered part of the membership view.
    #[serde(default)]
    pub static_peers: Vec<String>,
    /// Tracked clock entries before a growth warning is logged.
    #[serde(default = "default_clock_growth_warn_threshold")]
    pub clock_growth_warn_threshold: usize,
    /// How long reconciled tasks and seen announcements are remembered for
    /// duplicate suppression. Must cover the liveness window.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

impl CoordinatorConfig {
    /// Defaults for `peer_id`.
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            normalization_bits: default_normalization_bits(),
            task_timeout_ms: default_task_timeout_ms(),
            max_reannounce_attempts: default_max_reannounce_attempts(),
            reannounce_backoff_ms: default_reannounce_backoff_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            static_peers: Vec::new(),
            clock_growth_warn_threshold: default_clock_growth_warn_threshold(),
            retention_ms: default_retention_ms(),
        }
    }

    /// Set the static peer list.
    #[must_use]
    pub fn with_static_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-task timeout.
    #[must_use]
    pub const fn with_task_timeout_ms(mut self, ms: u64) -> Self {
        self.task_timeout_ms = ms;
        self
    }

    /// Set the re-announcement budget.
    #[must_use]
    pub const fn with_max_reannounce_attempts(mut self, attempts: u32) -> Self {
        self.max_reannounce_attempts = attempts;
        self
    }

    /// Set the record retention.
    #[must_use]
    pub const fn with_retention_ms(mut self, ms: u64) -> Self {
        self.retention_ms = ms;
        self
    }

    /// Set the normalization width.
    #[must_use]
    pub const fn with_normalization_bits(mut self, bits: usize) -> Self {
        self.normalization_bits = bits;
        self
    }

    /// Per-task timeout as a duration.
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Heartbeat period as a duration.
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Window within which a heartbeat keeps a peer in the membership view.
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_mul(3))
    }

    /// Backoff before re-announcement number `attempt` (1-based).
    pub fn reannounce_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.reannounce_backoff_ms.saturating_mul(1u64 << exp))
    }

    /// Record retention as a duration.
    pub const fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Longest time from first announcement to a final `timeout` failure:
    /// one timeout per attempt plus every backoff in between.
    pub fn failure_deadline(&self) -> Duration {
        (1..=self.max_reannounce_attempts).fold(self.task_timeout(), |total, attempt| {
            total
                .saturating_add(self.reannounce_backoff(attempt))
                .saturating_add(self.task_timeout())
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.peer_id.trim().is_empty() {
            return Err("peer_id must not be empty".into());
        }
        if self.normalization_bits == 0 {
            return Err("normalization_bits must be greater than 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be greater than 0".into());
        }
        if self.clock_growth_warn_threshold == 0 {
            return Err("clock_growth_warn_threshold must be greater than 0".into());
        }
        if self.retention() < self.liveness_window() {
            return Err(format!(
                "retention_ms {} must cover the liveness window of {} ms",
                self.retention_ms,
                self.liveness_window().as_millis()
            ));
        }
        if let Some(peer) = self.static_peers.iter().find(|p| p.trim().is_empty()) {
            return Err(format!("static peer `{peer}` is empty"));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `PEER_SCHED_*` environment variables after
    /// loading `.env` if present.
    ///
    /// `PEER_SCHED_PEER_ID` is required; `PEER_SCHED_STATIC_PEERS` is a comma
    /// separated list. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        let peer_id = var("PEER_ID").ok_or_else(|| format!("{ENV_PREFIX}PEER_ID is not set"))?;
        let mut cfg = Self::new(peer_id.trim());

        if let Some(v) = var("NORMALIZATION_BITS") {
            cfg.normalization_bits = parse_var("NORMALIZATION_BITS", &v)?;
        }
        if let Some(v) = var("TASK_TIMEOUT_MS") {
            cfg.task_timeout_ms = parse_var("TASK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("MAX_REANNOUNCE_ATTEMPTS") {
            cfg.max_reannounce_attempts = parse_var("MAX_REANNOUNCE_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("REANNOUNCE_BACKOFF_MS") {
            cfg.reannounce_backoff_ms = parse_var("REANNOUNCE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat_interval_ms = parse_var("HEARTBEAT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("CLOCK_GROWTH_WARN_THRESHOLD") {
            cfg.clock_growth_warn_threshold = parse_var("CLOCK_GROWTH_WARN_THRESHOLD", &v)?;
        }
        if let Some(v) = var("RETENTION_MS") {
            cfg.retention_ms = parse_var("RETENTION_MS", &v)?;
        }
        if let Some(v) = var("STATIC_PEERS") {
            cfg.static_peers = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}={raw}: {e}"))
}
