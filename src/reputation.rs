//! Beta-distribution reputation model.
//!
//! Each node carries two independent channels, audit and uptime. A
//! channel is a pair (alpha, beta) updated online from binary
//! outcomes: lambda exponentially decays past evidence and the weight
//! scales the impact of a new sample. The score is
//! `alpha / (alpha + beta)`; a node whose score falls to the
//! disqualification threshold is barred permanently.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Apply one binary outcome to a channel.
///
/// Returns the new (alpha, beta, total count). With `lambda == 1` and
/// `weight == 0` this is the identity on (alpha, beta).
#[must_use]
pub fn update_reputation(
    is_success: bool,
    alpha: f64,
    beta: f64,
    lambda: f64,
    weight: f64,
    total_count: i64,
) -> (f64, f64, i64) {
    // v is a single feedback value updating both alpha and beta
    let v: f64 = if is_success { 1.0 } else { -1.0 };
    let new_alpha = lambda * alpha + weight * (1.0 + v) / 2.0;
    let new_beta = lambda * beta + weight * (1.0 - v) / 2.0;
    (new_alpha, new_beta, total_count + 1)
}

/// The reputation score of a channel, in [0, 1].
#[must_use]
pub fn reputation_score(alpha: f64, beta: f64) -> f64 {
    alpha / (alpha + beta)
}

/// Per-node reputation state held by the satellite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Audit channel alpha.
    pub audit_reputation_alpha: f64,
    /// Audit channel beta.
    pub audit_reputation_beta: f64,
    /// Uptime channel alpha.
    pub uptime_reputation_alpha: f64,
    /// Uptime channel beta.
    pub uptime_reputation_beta: f64,

    /// Number of audits applied.
    pub audit_count: i64,
    /// Number of successful audits.
    pub audit_success_count: i64,
    /// Number of uptime probes applied.
    pub uptime_count: i64,
    /// Number of successful uptime probes.
    pub uptime_success_count: i64,

    /// Last successful contact, if any.
    pub last_contact_success: Option<SystemTime>,
    /// Last failed contact, if any.
    pub last_contact_failure: Option<SystemTime>,

    /// When the node was disqualified. Write-once: set the first time
    /// a channel score reaches its threshold, never cleared.
    pub disqualified: Option<SystemTime>,
    /// Whether the node is contained pending audit resolution.
    pub contained: bool,
}

impl NodeStats {
    /// Stats seeded from the configured priors on first sighting.
    #[must_use]
    pub fn with_priors(
        audit_alpha_0: f64,
        audit_beta_0: f64,
        uptime_alpha_0: f64,
        uptime_beta_0: f64,
    ) -> Self {
        Self {
            audit_reputation_alpha: audit_alpha_0,
            audit_reputation_beta: audit_beta_0,
            uptime_reputation_alpha: uptime_alpha_0,
            uptime_reputation_beta: uptime_beta_0,
            audit_count: 0,
            audit_success_count: 0,
            uptime_count: 0,
            uptime_success_count: 0,
            last_contact_success: None,
            last_contact_failure: None,
            disqualified: None,
            contained: false,
        }
    }

    /// Current audit-channel score.
    #[must_use]
    pub fn audit_score(&self) -> f64 {
        reputation_score(self.audit_reputation_alpha, self.audit_reputation_beta)
    }

    /// Current uptime-channel score.
    #[must_use]
    pub fn uptime_score(&self) -> f64 {
        reputation_score(self.uptime_reputation_alpha, self.uptime_reputation_beta)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_update_matches_closed_form() {
        let lambda = 0.95;
        let weight = 1.0;
        let (mut alpha, mut beta, mut count) = (1.0_f64, 0.0_f64, 0_i64);
        let outcomes = [true, false, false, true, false];

        for (i, &success) in outcomes.iter().enumerate() {
            let (next_alpha, next_beta, next_count) =
                update_reputation(success, alpha, beta, lambda, weight, count);

            let v: f64 = if success { 1.0 } else { -1.0 };
            let expected_alpha = lambda * alpha + weight * (1.0 + v) / 2.0;
            let expected_beta = lambda * beta + weight * (1.0 - v) / 2.0;

            assert!(
                (next_alpha - expected_alpha).abs() < TOLERANCE,
                "alpha diverged at step {i}"
            );
            assert!(
                (next_beta - expected_beta).abs() < TOLERANCE,
                "beta diverged at step {i}"
            );
            assert_eq!(next_count, count + 1);

            alpha = next_alpha;
            beta = next_beta;
            count = next_count;
        }
    }

    #[test]
    fn test_identity_update() {
        let (alpha, beta, count) = update_reputation(true, 2.5, 1.5, 1.0, 0.0, 7);
        assert_eq!(alpha, 2.5);
        assert_eq!(beta, 1.5);
        assert_eq!(count, 8);

        let (alpha, beta, _) = update_reputation(false, 2.5, 1.5, 1.0, 0.0, 7);
        assert_eq!(alpha, 2.5);
        assert_eq!(beta, 1.5);
    }

    #[test]
    fn test_score_bounds() {
        assert_eq!(reputation_score(1.0, 0.0), 1.0);
        assert!((reputation_score(1.0, 1.0) - 0.5).abs() < TOLERANCE);

        // successes push the score up, failures down
        let (alpha, beta, _) = update_reputation(true, 1.0, 1.0, 0.95, 1.0, 0);
        assert!(reputation_score(alpha, beta) > 0.5);
        let (alpha, beta, _) = update_reputation(false, 1.0, 1.0, 0.95, 1.0, 0);
        assert!(reputation_score(alpha, beta) < 0.5);
    }

    #[test]
    fn test_priors_seed_stats() {
        let stats = NodeStats::with_priors(1.0, 0.0, 2.0, 0.5);
        assert_eq!(stats.audit_reputation_alpha, 1.0);
        assert_eq!(stats.uptime_reputation_beta, 0.5);
        assert!(stats.disqualified.is_none());
        assert_eq!(stats.uptime_count, 0);
    }
}
