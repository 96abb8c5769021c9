//! Persistence contract for the settlement pipeline, plus the bundled
//! in-memory implementation.
//!
//! [`use_serial_number`](OrdersDb::use_serial_number) is the single
//! point of exclusion: once a (serial, node) pair is recorded, no other
//! node can consume that serial. Bandwidth rollups are monotonic
//! counters keyed by hour-aligned intervals.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::orders::{
    BucketId, PieceAction, ProcessOrderRequest, ProcessOrderResponse, SerialNumber,
    SettlementStatus,
};

/// Bandwidth rollup interval granularity.
const INTERVAL_GRANULARITY: Duration = Duration::from_secs(3600);

/// Truncate a timestamp to the start of its rollup interval.
#[must_use]
pub fn interval_start(at: SystemTime) -> SystemTime {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let aligned = since_epoch.as_secs() - since_epoch.as_secs() % INTERVAL_GRANULARITY.as_secs();
    UNIX_EPOCH + Duration::from_secs(aligned)
}

/// Storage contract consumed by the settlement endpoint.
///
/// Callers serialize concurrent requests per serial through
/// [`use_serial_number`](Self::use_serial_number); the other operations
/// are plain counter updates and sweeps.
#[async_trait]
pub trait OrdersDb: Send + Sync {
    /// Insert a serial entry. Duplicate serials are an error.
    async fn create_serial_info(
        &self,
        serial: SerialNumber,
        bucket: BucketId,
        limit_expiration: SystemTime,
    ) -> Result<()>;

    /// Atomically mark the serial used by `storage_node`, returning the
    /// bucket it was issued for.
    ///
    /// Retrying with the same node is idempotent and returns the bucket
    /// again; any other node gets [`Error::SerialReused`]. Expired
    /// serials are refused even before the sweeper removes them.
    async fn use_serial_number(
        &self,
        serial: SerialNumber,
        storage_node: NodeId,
    ) -> Result<BucketId>;

    /// Compensating inverse of [`use_serial_number`](Self::use_serial_number);
    /// idempotent.
    async fn unuse_serial_number(&self, serial: SerialNumber, storage_node: NodeId) -> Result<()>;

    /// Remove serial entries whose limit-expiration is before `now`.
    /// Returns the number of entries removed.
    async fn delete_expired_serials(&self, now: SystemTime) -> Result<usize>;

    /// Add to the bucket's allocated counter for the interval.
    async fn update_bucket_bandwidth_allocation(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()>;

    /// Add to the bucket's settled counter for the interval.
    async fn update_bucket_bandwidth_settle(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()>;

    /// Add to the bucket's inline counter for the interval.
    async fn update_bucket_bandwidth_inline(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()>;

    /// Add to the storage node's allocated counter for the interval.
    async fn update_storagenode_bandwidth_allocation(
        &self,
        storage_node: NodeId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()>;

    /// Add to the storage node's settled counter for the interval.
    async fn update_storagenode_bandwidth_settle(
        &self,
        storage_node: NodeId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()>;

    /// Total allocated bucket bandwidth over `[from, to]`.
    async fn get_bucket_bandwidth(
        &self,
        bucket: BucketId,
        from: SystemTime,
        to: SystemTime,
    ) -> Result<i64>;

    /// Total settled storage-node bandwidth over `[from, to]`.
    async fn get_storage_node_bandwidth(
        &self,
        storage_node: NodeId,
        from: SystemTime,
        to: SystemTime,
    ) -> Result<i64>;

    /// Settle a batch of orders, one independent transaction per
    /// request. Returns one response per request, in completion order.
    async fn process_orders(
        &self,
        requests: &[ProcessOrderRequest],
    ) -> Result<Vec<ProcessOrderResponse>>;
}

#[derive(Debug, Clone)]
struct SerialRow {
    bucket: BucketId,
    limit_expiration: SystemTime,
    used_by: Option<(NodeId, SystemTime)>,
}

#[derive(Debug, Default, Clone, Copy)]
struct BandwidthRollup {
    allocated: i64,
    settled: i64,
    inline: i64,
}

/// In-memory [`OrdersDb`].
///
/// Serial rows live under one mutex; each rollup table under its own.
/// No lock is held across an await point.
#[derive(Debug, Default)]
pub struct InmemoryOrdersDb {
    serials: Mutex<HashMap<SerialNumber, SerialRow>>,
    bucket_bandwidth: Mutex<HashMap<(BucketId, PieceAction, SystemTime), BandwidthRollup>>,
    node_bandwidth: Mutex<HashMap<(NodeId, PieceAction, SystemTime), BandwidthRollup>>,
}

impl InmemoryOrdersDb {
    /// Create an empty in-memory orders database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live serial entries. Exposed for sweeper diagnostics.
    #[must_use]
    pub fn serial_count(&self) -> usize {
        self.serials.lock().len()
    }

    /// Mark the serial used by `storage_node`, refusing any prior use.
    ///
    /// Settlement goes through this strict path so a node replaying
    /// the same order twice is rejected instead of credited twice; the
    /// trait-level [`use_serial_number`](OrdersDb::use_serial_number)
    /// additionally tolerates same-node retries of the compensation
    /// flow.
    fn mark_serial_used(&self, serial: SerialNumber, storage_node: NodeId) -> Result<BucketId> {
        let mut serials = self.serials.lock();
        let row = serials
            .get_mut(&serial)
            .ok_or_else(|| Error::SerialNotFound(serial.to_string()))?;

        if row.limit_expiration < SystemTime::now() {
            return Err(Error::SerialExpired(serial.to_string()));
        }
        if row.used_by.is_some() {
            return Err(Error::SerialReused(serial.to_string()));
        }
        row.used_by = Some((storage_node, SystemTime::now()));
        Ok(row.bucket.clone())
    }
}

#[async_trait]
impl OrdersDb for InmemoryOrdersDb {
    async fn create_serial_info(
        &self,
        serial: SerialNumber,
        bucket: BucketId,
        limit_expiration: SystemTime,
    ) -> Result<()> {
        let mut serials = self.serials.lock();
        if serials.contains_key(&serial) {
            return Err(Error::Db(format!("serial already exists: {serial}")));
        }
        serials.insert(
            serial,
            SerialRow {
                bucket,
                limit_expiration,
                used_by: None,
            },
        );
        Ok(())
    }

    async fn use_serial_number(
        &self,
        serial: SerialNumber,
        storage_node: NodeId,
    ) -> Result<BucketId> {
        {
            // retry from the same node returns the bucket again
            let serials = self.serials.lock();
            if let Some(row) = serials.get(&serial) {
                if matches!(row.used_by, Some((user, _)) if user == storage_node) {
                    return Ok(row.bucket.clone());
                }
            }
        }
        self.mark_serial_used(serial, storage_node)
    }

    async fn unuse_serial_number(&self, serial: SerialNumber, storage_node: NodeId) -> Result<()> {
        let mut serials = self.serials.lock();
        if let Some(row) = serials.get_mut(&serial) {
            if matches!(row.used_by, Some((user, _)) if user == storage_node) {
                row.used_by = None;
            }
        }
        Ok(())
    }

    async fn delete_expired_serials(&self, now: SystemTime) -> Result<usize> {
        let mut serials = self.serials.lock();
        let before = serials.len();
        serials.retain(|_, row| row.limit_expiration >= now);
        Ok(before - serials.len())
    }

    async fn update_bucket_bandwidth_allocation(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()> {
        let mut rollups = self.bucket_bandwidth.lock();
        let rollup = rollups
            .entry((bucket, action, interval_start(interval)))
            .or_default();
        rollup.allocated += amount;
        Ok(())
    }

    async fn update_bucket_bandwidth_settle(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()> {
        let mut rollups = self.bucket_bandwidth.lock();
        let rollup = rollups
            .entry((bucket, action, interval_start(interval)))
            .or_default();
        rollup.settled += amount;
        Ok(())
    }

    async fn update_bucket_bandwidth_inline(
        &self,
        bucket: BucketId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()> {
        let mut rollups = self.bucket_bandwidth.lock();
        let rollup = rollups
            .entry((bucket, action, interval_start(interval)))
            .or_default();
        rollup.inline += amount;
        Ok(())
    }

    async fn update_storagenode_bandwidth_allocation(
        &self,
        storage_node: NodeId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()> {
        let mut rollups = self.node_bandwidth.lock();
        let rollup = rollups
            .entry((storage_node, action, interval_start(interval)))
            .or_default();
        rollup.allocated += amount;
        Ok(())
    }

    async fn update_storagenode_bandwidth_settle(
        &self,
        storage_node: NodeId,
        action: PieceAction,
        amount: i64,
        interval: SystemTime,
    ) -> Result<()> {
        let mut rollups = self.node_bandwidth.lock();
        let rollup = rollups
            .entry((storage_node, action, interval_start(interval)))
            .or_default();
        rollup.settled += amount;
        Ok(())
    }

    async fn get_bucket_bandwidth(
        &self,
        bucket: BucketId,
        from: SystemTime,
        to: SystemTime,
    ) -> Result<i64> {
        let rollups = self.bucket_bandwidth.lock();
        Ok(rollups
            .iter()
            .filter(|((b, _, interval), _)| *b == bucket && *interval >= from && *interval <= to)
            .map(|(_, rollup)| rollup.allocated)
            .sum())
    }

    async fn get_storage_node_bandwidth(
        &self,
        storage_node: NodeId,
        from: SystemTime,
        to: SystemTime,
    ) -> Result<i64> {
        let rollups = self.node_bandwidth.lock();
        Ok(rollups
            .iter()
            .filter(|((node, _, interval), _)| {
                *node == storage_node && *interval >= from && *interval <= to
            })
            .map(|(_, rollup)| rollup.settled)
            .sum())
    }

    async fn process_orders(
        &self,
        requests: &[ProcessOrderRequest],
    ) -> Result<Vec<ProcessOrderResponse>> {
        let now = SystemTime::now();
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            let serial = request.order.serial_number;
            let node = request.order_limit.storage_node_id;
            let action = request.order_limit.action;
            let amount = request.order.amount;

            let bucket = match self.mark_serial_used(serial, node) {
                Ok(bucket) => bucket,
                Err(err) => {
                    debug!(serial = %serial, %err, "serial refused during settlement");
                    responses.push(ProcessOrderResponse {
                        serial_number: serial,
                        status: SettlementStatus::Rejected,
                    });
                    continue;
                }
            };

            let settled: Result<()> = async {
                self.update_bucket_bandwidth_allocation(bucket.clone(), action, amount, now)
                    .await?;
                self.update_bucket_bandwidth_settle(bucket, action, amount, now)
                    .await?;
                self.update_storagenode_bandwidth_settle(node, action, amount, now)
                    .await
            }
            .await;

            let status = match settled {
                Ok(()) => SettlementStatus::Accepted,
                Err(err) => {
                    // release the serial so the node can retry later
                    debug!(serial = %serial, %err, "bandwidth update failed, compensating");
                    self.unuse_serial_number(serial, node).await?;
                    SettlementStatus::Rejected
                }
            };

            responses.push(ProcessOrderResponse {
                serial_number: serial,
                status,
            });
        }

        Ok(responses)
    }
}
