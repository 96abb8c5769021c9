//! Background sweep of expired serial entries.
//!
//! The sweep is advisory: `use_serial_number` refuses expired serials
//! on its own, so a late sweep only delays reclamation of memory.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::orders::db::OrdersDb;

/// Periodic expired-serial sweeper.
pub struct SerialSweeper {
    db: Arc<dyn OrdersDb>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SerialSweeper {
    /// Create a sweeper ticking at `interval`, stopping when the
    /// shutdown channel flips to true.
    #[must_use]
    pub fn new(db: Arc<dyn OrdersDb>, interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            db,
            interval,
            shutdown,
        }
    }

    /// Run until shutdown. Shutdown is a normal exit, not a failure.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        // the immediate first tick would sweep an empty table
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    // a dropped sender counts as shutdown too
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.db.delete_expired_serials(SystemTime::now()).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "swept expired serials"),
                        Err(err) => warn!(%err, "expired-serial sweep failed"),
                    }
                }
            }
        }
        debug!("serial sweeper stopped");
    }
}
