//! Storage-node service for fetching its own stats from satellites.
//!
//! The node periodically asks each trusted satellite how it is doing:
//! per-channel reputation metrics and whether it has been
//! disqualified. The dialer is a trait seam; the connection is scoped
//! to one call and released on every exit path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::reputation::NodeStats;
use crate::trust::TrustPool;

/// One reputation channel as reported by a satellite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReputationMetric {
    /// Number of outcomes applied.
    pub total_count: i64,
    /// Number of successful outcomes.
    pub success_count: i64,
    /// Channel alpha.
    pub alpha: f64,
    /// Channel beta.
    pub beta: f64,
    /// Channel score.
    pub score: f64,
}

/// Stats payload returned by a satellite's stats endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsResponse {
    /// Audit channel metrics.
    pub audit: ReputationMetric,
    /// Uptime channel metrics.
    pub uptime: ReputationMetric,
    /// When the node was disqualified, if ever.
    pub disqualified: Option<SystemTime>,
}

impl StatsResponse {
    /// Build the response a satellite serves from its overlay record.
    #[must_use]
    pub fn from_node_stats(stats: &NodeStats) -> Self {
        Self {
            audit: ReputationMetric {
                total_count: stats.audit_count,
                success_count: stats.audit_success_count,
                alpha: stats.audit_reputation_alpha,
                beta: stats.audit_reputation_beta,
                score: stats.audit_score(),
            },
            uptime: ReputationMetric {
                total_count: stats.uptime_count,
                success_count: stats.uptime_success_count,
                alpha: stats.uptime_reputation_alpha,
                beta: stats.uptime_reputation_beta,
                score: stats.uptime_score(),
            },
            disqualified: stats.disqualified,
        }
    }
}

/// A node's view of its standing with one satellite.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// The satellite that reported the stats.
    pub satellite_id: NodeId,
    /// Audit channel metrics.
    pub audit: ReputationMetric,
    /// Uptime channel metrics.
    pub uptime: ReputationMetric,
    /// When the node was disqualified, if ever.
    pub disqualified: Option<SystemTime>,
    /// When this snapshot was fetched.
    pub updated_at: SystemTime,
}

/// Open connection to a satellite's stats endpoint.
#[async_trait]
pub trait NodeStatsClient: Send {
    /// Fetch the calling node's stats.
    async fn get_stats(&mut self) -> Result<StatsResponse>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens stats connections to satellites.
#[async_trait]
pub trait NodeStatsDialer: Send + Sync {
    /// Dial the stats endpoint of the satellite at `address`.
    async fn dial(&self, satellite_id: NodeId, address: &str) -> Result<Box<dyn NodeStatsClient>>;
}

/// Retrieves node stats from satellites.
pub struct Service {
    dialer: Arc<dyn NodeStatsDialer>,
    trust: Arc<TrustPool>,
}

impl Service {
    /// Create a stats service.
    #[must_use]
    pub fn new(dialer: Arc<dyn NodeStatsDialer>, trust: Arc<TrustPool>) -> Self {
        Self { dialer, trust }
    }

    /// Fetch this node's reputation stats from one satellite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trust`] for unknown satellites and transport
    /// errors from the dial or the call itself. A close failure after
    /// a successful call is reported too.
    pub async fn reputation_stats(&self, satellite_id: NodeId) -> Result<Stats> {
        let address = self.trust.address(satellite_id)?;
        let mut client = self.dialer.dial(satellite_id, &address).await?;

        let response = client.get_stats().await;
        let closed = client.close().await;

        // the call result outranks a close failure
        let response = response?;
        if let Err(err) = closed {
            return Err(Error::Transport(format!(
                "failed to close stats connection to {satellite_id}: {err}"
            )));
        }

        debug!(satellite = %satellite_id, audit_score = response.audit.score,
            uptime_score = response.uptime.score, "fetched node stats");

        Ok(Stats {
            satellite_id,
            audit: response.audit,
            uptime: response.uptime,
            disqualified: response.disqualified,
            updated_at: SystemTime::now(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::config::ReputationConfig;
    use crate::overlay::Inmemory;

    /// Client double reading straight from a satellite overlay.
    struct OverlayClient {
        overlay: Arc<Inmemory>,
        node_id: NodeId,
        closed: bool,
    }

    #[async_trait]
    impl NodeStatsClient for OverlayClient {
        async fn get_stats(&mut self) -> Result<StatsResponse> {
            let dossier = self.overlay.get(self.node_id)?;
            Ok(StatsResponse::from_node_stats(&dossier.reputation))
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    struct OverlayDialer {
        overlay: Arc<Inmemory>,
        node_id: NodeId,
    }

    #[async_trait]
    impl NodeStatsDialer for OverlayDialer {
        async fn dial(
            &self,
            _satellite_id: NodeId,
            _address: &str,
        ) -> Result<Box<dyn NodeStatsClient>> {
            Ok(Box::new(OverlayClient {
                overlay: Arc::clone(&self.overlay),
                node_id: self.node_id,
                closed: false,
            }))
        }
    }

    #[tokio::test]
    async fn test_reputation_stats_round_trip() {
        let satellite_id = NodeId::from_bytes([1u8; 32]);
        let node_id = NodeId::from_bytes([2u8; 32]);

        let overlay = Arc::new(Inmemory::new(ReputationConfig::default()));
        overlay.update_address(node_id, "node:7777").expect("insert");
        overlay.update_uptime(node_id, true, 0.95, 1.0, 0.6).expect("probe");

        let trust = Arc::new(TrustPool::new([(satellite_id, "sat:7777".to_string())]));
        let service = Service::new(
            Arc::new(OverlayDialer {
                overlay: Arc::clone(&overlay),
                node_id,
            }),
            trust,
        );

        let stats = service.reputation_stats(satellite_id).await.expect("stats");
        assert_eq!(stats.satellite_id, satellite_id);
        assert_eq!(stats.uptime.total_count, 1);
        assert_eq!(stats.uptime.success_count, 1);
        assert!(stats.disqualified.is_none());
        assert_eq!(stats.audit.alpha, 1.0);
    }

    #[tokio::test]
    async fn test_untrusted_satellite_refused() {
        let overlay = Arc::new(Inmemory::new(ReputationConfig::default()));
        let service = Service::new(
            Arc::new(OverlayDialer {
                overlay,
                node_id: NodeId::from_bytes([2u8; 32]),
            }),
            Arc::new(TrustPool::default()),
        );

        let err = service
            .reputation_stats(NodeId::from_bytes([1u8; 32]))
            .await
            .expect_err("unknown satellite");
        assert!(matches!(err, Error::Trust(_)));
    }
}
