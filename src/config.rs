//! Configuration for meridian-node.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settlement endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Number of buffered requests that triggers a batch flush.
    #[serde(default = "default_settlement_batch_size")]
    pub settlement_batch_size: usize,

    /// Interval between expired-serial sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl SettlementConfig {
    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            settlement_batch_size: default_settlement_batch_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

const fn default_settlement_batch_size() -> usize {
    100
}

const fn default_sweep_interval_secs() -> u64 {
    3600
}

/// Uplink piecestore client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiecestoreConfig {
    /// First allocation granted to the storage node, in bytes.
    #[serde(default = "default_initial_allocation_step")]
    pub initial_allocation_step: i64,

    /// Upper bound for the allocation step growth, in bytes.
    ///
    /// Clamped to the download size at session start so a single grant
    /// can never exceed the remaining transfer.
    #[serde(default = "default_max_allocation_step")]
    pub max_allocation_step: i64,

    /// Size of the consumer-side download buffer, in bytes.
    /// 0 disables buffering.
    #[serde(default = "default_download_buffer_size")]
    pub download_buffer_size: i64,
}

impl Default for PiecestoreConfig {
    fn default() -> Self {
        Self {
            initial_allocation_step: default_initial_allocation_step(),
            max_allocation_step: default_max_allocation_step(),
            download_buffer_size: default_download_buffer_size(),
        }
    }
}

const fn default_initial_allocation_step() -> i64 {
    64 * 1024
}

const fn default_max_allocation_step() -> i64 {
    1024 * 1024
}

const fn default_download_buffer_size() -> i64 {
    32 * 1024
}

/// Order sender transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Dial timeout for the settlement connection, in milliseconds.
    #[serde(default = "default_sender_dial_timeout_ms")]
    pub sender_dial_timeout_ms: u64,

    /// Per-response receive timeout, in milliseconds.
    #[serde(default = "default_sender_request_timeout_ms")]
    pub sender_request_timeout_ms: u64,
}

impl SenderConfig {
    /// Dial timeout as a [`Duration`].
    #[must_use]
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.sender_dial_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sender_request_timeout_ms)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            sender_dial_timeout_ms: default_sender_dial_timeout_ms(),
            sender_request_timeout_ms: default_sender_request_timeout_ms(),
        }
    }
}

const fn default_sender_dial_timeout_ms() -> u64 {
    10_000
}

const fn default_sender_request_timeout_ms() -> u64 {
    10_000
}

/// Reputation model tuning.
///
/// Each channel (audit, uptime) has a forgetting factor lambda in (0, 1],
/// a sample weight, a disqualification threshold on the score
/// `alpha / (alpha + beta)`, and the priors seeded when a node is first
/// sighted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Forgetting factor for the audit channel.
    #[serde(default = "default_lambda")]
    pub audit_lambda: f64,
    /// Weight of a new audit sample.
    #[serde(default = "default_weight")]
    pub audit_weight: f64,
    /// Disqualification threshold for the audit score.
    #[serde(default = "default_dq")]
    pub audit_dq: f64,

    /// Forgetting factor for the uptime channel.
    #[serde(default = "default_lambda")]
    pub uptime_lambda: f64,
    /// Weight of a new uptime sample.
    #[serde(default = "default_weight")]
    pub uptime_weight: f64,
    /// Disqualification threshold for the uptime score.
    #[serde(default = "default_dq")]
    pub uptime_dq: f64,

    /// Audit alpha prior seeded on first sighting.
    #[serde(default = "default_alpha_0")]
    pub audit_reputation_alpha_0: f64,
    /// Audit beta prior seeded on first sighting.
    #[serde(default = "default_beta_0")]
    pub audit_reputation_beta_0: f64,
    /// Uptime alpha prior seeded on first sighting.
    #[serde(default = "default_alpha_0")]
    pub uptime_reputation_alpha_0: f64,
    /// Uptime beta prior seeded on first sighting.
    #[serde(default = "default_beta_0")]
    pub uptime_reputation_beta_0: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            audit_lambda: default_lambda(),
            audit_weight: default_weight(),
            audit_dq: default_dq(),
            uptime_lambda: default_lambda(),
            uptime_weight: default_weight(),
            uptime_dq: default_dq(),
            audit_reputation_alpha_0: default_alpha_0(),
            audit_reputation_beta_0: default_beta_0(),
            uptime_reputation_alpha_0: default_alpha_0(),
            uptime_reputation_beta_0: default_beta_0(),
        }
    }
}

const fn default_lambda() -> f64 {
    0.95
}

const fn default_weight() -> f64 {
    1.0
}

const fn default_dq() -> f64 {
    0.6
}

const fn default_alpha_0() -> f64 {
    1.0
}

const fn default_beta_0() -> f64 {
    0.0
}

/// Top-level configuration for a satellite core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SatelliteConfig {
    /// Settlement endpoint configuration.
    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Reputation model tuning.
    #[serde(default)]
    pub reputation: ReputationConfig,
}
