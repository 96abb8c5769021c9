//! Satellite-side settlement endpoint.
//!
//! Storage nodes open a bidirectional stream and replay collected
//! (limit, order) pairs. Each request is verified against the satellite
//! signee and the uplink key embedded in the limit, then buffered;
//! batches flush to the database when full and on stream termination.
//!
//! Per-order validation failures are soft: the endpoint answers with a
//! `REJECTED` response and keeps the stream open. Missing frames and
//! identity mismatches are protocol violations and terminate the
//! stream. EOF from the peer is normal termination.

use async_trait::async_trait;
use k256::ecdsa::VerifyingKey;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identity::PeerIdentity;
use crate::metrics::SettlementMetrics;
use crate::orders::db::OrdersDb;
use crate::orders::signing::{verify_order_limit_signature, verify_uplink_order_signature};
use crate::orders::{
    Order, OrderLimit, ProcessOrderRequest, SettlementRequest, SettlementResponse,
    SettlementStatus,
};

/// Server half of a settlement stream.
///
/// Implementations carry the authenticated peer identity from the
/// transport handshake. `recv` returning `Ok(None)` is the peer's EOF.
#[async_trait]
pub trait SettlementStream: Send {
    /// The authenticated peer, if the transport produced one.
    fn peer_identity(&self) -> Option<PeerIdentity>;

    /// Receive the next request frame; `None` on clean EOF.
    async fn recv(&mut self) -> Result<Option<SettlementRequest>>;

    /// Send a response frame.
    async fn send(&mut self, response: SettlementResponse) -> Result<()>;
}

/// Validate one settlement request against the satellite signee.
///
/// `now` is passed in so the expiration boundary is testable.
///
/// # Errors
///
/// Returns the rejection reason; callers translate it into a
/// `REJECTED` response rather than a stream error.
pub fn verify_settlement_request(
    satellite_signee: &VerifyingKey,
    limit: &OrderLimit,
    order: &Order,
    now: SystemTime,
) -> Result<()> {
    // satellite verifies that it signed the order limit
    verify_order_limit_signature(satellite_signee, limit)?;

    // the order must match the pubkey named in the limit
    verify_uplink_order_signature(&limit.uplink_public_key, order)?;

    if limit.serial_number != order.serial_number {
        return Err(Error::SerialMismatch);
    }

    if order.amount > limit.limit {
        return Err(Error::InvalidArgument(
            "order amount exceeds limit".to_string(),
        ));
    }

    if limit.order_expiration <= now {
        return Err(Error::ExpiredLimit);
    }

    Ok(())
}

/// Streaming settlement endpoint.
pub struct Endpoint {
    satellite_signee: VerifyingKey,
    db: Arc<dyn OrdersDb>,
    metrics: Arc<SettlementMetrics>,
    settlement_batch_size: usize,
}

impl Endpoint {
    /// Create a settlement endpoint.
    #[must_use]
    pub fn new(
        satellite_signee: VerifyingKey,
        db: Arc<dyn OrdersDb>,
        metrics: Arc<SettlementMetrics>,
        settlement_batch_size: usize,
    ) -> Self {
        Self {
            satellite_signee,
            db,
            metrics,
            settlement_batch_size: settlement_batch_size.max(1),
        }
    }

    /// Serve one settlement stream to completion.
    ///
    /// # Errors
    ///
    /// Returns a stream-fatal error: missing peer identity, malformed
    /// frames, identity mismatch, or transport/database failures.
    /// Per-order rejections are answered in-stream and do not error.
    pub async fn settlement<S: SettlementStream>(&self, stream: &mut S) -> Result<()> {
        let peer = stream
            .peer_identity()
            .ok_or_else(|| Error::Unauthenticated("missing peer identity".to_string()))?;

        debug!(peer = %peer.id, "settlement stream opened");

        let mut requests: Vec<ProcessOrderRequest> =
            Vec::with_capacity(self.settlement_batch_size);

        let result = self.receive_loop(stream, &peer, &mut requests).await;

        // flush whatever is buffered on the way out; when the loop
        // already failed this is best-effort only
        if !requests.is_empty() {
            let flushed = self.process_orders(stream, &requests).await;
            match (&result, flushed) {
                (Ok(()), Err(err)) => return Err(err),
                (Err(_), Err(err)) => {
                    debug!(peer = %peer.id, %err, "residual settlement flush failed");
                }
                _ => {}
            }
        }

        result
    }

    async fn receive_loop<S: SettlementStream>(
        &self,
        stream: &mut S,
        peer: &PeerIdentity,
        requests: &mut Vec<ProcessOrderRequest>,
    ) -> Result<()> {
        loop {
            let request = match stream.recv().await? {
                Some(request) => request,
                None => return Ok(()),
            };

            let limit = request
                .limit
                .ok_or_else(|| Error::InvalidArgument("order limit missing".to_string()))?;
            let order = request
                .order
                .ok_or_else(|| Error::InvalidArgument("order missing".to_string()))?;

            if limit.storage_node_id != peer.id {
                return Err(Error::Unauthenticated(
                    "only specified storage node can settle order".to_string(),
                ));
            }

            if let Err(reject) = verify_settlement_request(
                &self.satellite_signee,
                &limit,
                &order,
                SystemTime::now(),
            ) {
                debug!(peer = %peer.id, serial = %limit.serial_number, %reject,
                    "order verification failed");
                self.metrics.record_rejected();
                stream
                    .send(SettlementResponse {
                        serial_number: limit.serial_number,
                        status: SettlementStatus::Rejected,
                    })
                    .await?;
                continue;
            }

            requests.push(ProcessOrderRequest {
                order,
                order_limit: limit,
            });

            if requests.len() >= self.settlement_batch_size {
                let batch: Vec<_> = requests.drain(..).collect();
                self.process_orders(stream, &batch).await?;
            }
        }
    }

    async fn process_orders<S: SettlementStream>(
        &self,
        stream: &mut S,
        requests: &[ProcessOrderRequest],
    ) -> Result<()> {
        let responses = self.db.process_orders(requests).await.map_err(|err| {
            warn!(%err, "batch settlement failed");
            Error::Db(err.to_string())
        })?;

        for response in responses {
            match response.status {
                SettlementStatus::Accepted => self.metrics.record_accepted(),
                SettlementStatus::Rejected => self.metrics.record_rejected(),
            }
            stream
                .send(SettlementResponse {
                    serial_number: response.serial_number,
                    status: response.status,
                })
                .await?;
        }
        Ok(())
    }
}
