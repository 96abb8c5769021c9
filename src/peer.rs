//! Satellite core assembly.
//!
//! The builder constructs leaves first (database, metrics, endpoint)
//! and injects already-built dependencies, so the component graph has
//! no cycles and no owning back-edges. Shutdown is explicit and runs
//! in reverse construction order.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SatelliteConfig;
use crate::error::{Error, Result};
use crate::identity::FullIdentity;
use crate::metrics::SettlementMetrics;
use crate::orders::db::{InmemoryOrdersDb, OrdersDb};
use crate::orders::endpoint::Endpoint;
use crate::orders::sweeper::SerialSweeper;
use crate::overlay::Inmemory;

/// Builder for a satellite core.
pub struct SatelliteBuilder {
    identity: Arc<FullIdentity>,
    config: SatelliteConfig,
    db: Option<Arc<dyn OrdersDb>>,
}

impl SatelliteBuilder {
    /// Start building a satellite around its identity.
    #[must_use]
    pub fn new(identity: Arc<FullIdentity>, config: SatelliteConfig) -> Self {
        Self {
            identity,
            config,
            db: None,
        }
    }

    /// Use a specific orders database instead of the in-memory one.
    #[must_use]
    pub fn with_orders_db(mut self, db: Arc<dyn OrdersDb>) -> Self {
        self.db = Some(db);
        self
    }

    /// Build the satellite and start its background services.
    #[must_use]
    pub fn build(self) -> RunningSatellite {
        let db = self
            .db
            .unwrap_or_else(|| Arc::new(InmemoryOrdersDb::new()));
        let metrics = Arc::new(SettlementMetrics::new());
        let overlay = Arc::new(Inmemory::new(self.config.reputation.clone()));

        let endpoint = Arc::new(Endpoint::new(
            self.identity.verifying_key(),
            Arc::clone(&db),
            Arc::clone(&metrics),
            self.config.settlement.settlement_batch_size,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = SerialSweeper::new(
            Arc::clone(&db),
            self.config.settlement.sweep_interval(),
            shutdown_rx,
        );
        let sweeper_task = tokio::spawn(sweeper.run());

        info!(satellite = %self.identity.node_id(), "satellite core started");

        RunningSatellite {
            identity: self.identity,
            db,
            metrics,
            overlay,
            endpoint,
            shutdown_tx,
            sweeper_task: Some(sweeper_task),
        }
    }
}

/// A running satellite core.
///
/// Holds every long-lived component; [`close`](Self::close) tears them
/// down in reverse of construction.
pub struct RunningSatellite {
    identity: Arc<FullIdentity>,
    db: Arc<dyn OrdersDb>,
    metrics: Arc<SettlementMetrics>,
    overlay: Arc<Inmemory>,
    endpoint: Arc<Endpoint>,
    shutdown_tx: watch::Sender<bool>,
    sweeper_task: Option<JoinHandle<()>>,
}

impl RunningSatellite {
    /// The satellite's identity.
    #[must_use]
    pub fn identity(&self) -> &Arc<FullIdentity> {
        &self.identity
    }

    /// The settlement endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Arc<Endpoint> {
        Arc::clone(&self.endpoint)
    }

    /// The orders database.
    #[must_use]
    pub fn orders_db(&self) -> Arc<dyn OrdersDb> {
        Arc::clone(&self.db)
    }

    /// The node-dossier overlay.
    #[must_use]
    pub fn overlay(&self) -> Arc<Inmemory> {
        Arc::clone(&self.overlay)
    }

    /// Settlement metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<SettlementMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop background services and tear the core down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a background task panicked.
    pub async fn close(mut self) -> Result<()> {
        if self.shutdown_tx.send(true).is_err() {
            warn!("sweeper already gone at shutdown");
        }
        if let Some(task) = self.sweeper_task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("sweeper task failed: {e}")))?;
        }
        info!(satellite = %self.identity.node_id(), "satellite core stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_and_close() {
        let identity = Arc::new(FullIdentity::generate());
        let satellite = SatelliteBuilder::new(identity, SatelliteConfig::default()).build();

        assert_eq!(satellite.metrics().accepted(), 0);
        satellite.close().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_custom_db_is_injected() {
        let identity = Arc::new(FullIdentity::generate());
        let db = Arc::new(InmemoryOrdersDb::new());
        let satellite = SatelliteBuilder::new(identity, SatelliteConfig::default())
            .with_orders_db(db.clone())
            .build();

        // the same instance is visible through the accessor
        assert!(Arc::strong_count(&db) > 1);
        satellite.close().await.expect("clean shutdown");
    }
}
