//! Storage-node-side settlement sender.
//!
//! Collected (limit, order) pairs are replayed to the issuing
//! satellite over a settlement stream. The dialer is a trait seam so
//! the transport stays out of the core; timeouts come from
//! [`SenderConfig`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SenderConfig;
use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::orders::{Order, OrderLimit, SerialNumber, SettlementRequest, SettlementResponse, SettlementStatus};
use crate::trust::TrustPool;

/// Client half of a settlement stream.
#[async_trait]
pub trait SettlementClientStream: Send {
    /// Send one settlement request frame.
    async fn send(&mut self, request: SettlementRequest) -> Result<()>;

    /// Receive the next response frame; `None` when the server is done.
    async fn recv(&mut self) -> Result<Option<SettlementResponse>>;

    /// Half-close the sending direction, signalling EOF to the server.
    async fn close_send(&mut self) -> Result<()>;
}

/// Opens settlement streams to satellites. The connection is scoped to
/// one settlement pass: acquired on entry, dropped on every exit path.
#[async_trait]
pub trait SettlementDialer: Send + Sync {
    /// Dial the settlement endpoint of the satellite at `address`.
    async fn dial(
        &self,
        satellite_id: NodeId,
        address: &str,
    ) -> Result<Box<dyn SettlementClientStream>>;
}

/// An order held by the storage node awaiting settlement.
#[derive(Debug, Clone)]
pub struct ArchivedOrder {
    /// The satellite-signed limit.
    pub limit: OrderLimit,
    /// The uplink-signed order.
    pub order: Order,
}

/// Replays archived orders to satellites for settlement.
pub struct OrderSender {
    dialer: Arc<dyn SettlementDialer>,
    trust: Arc<TrustPool>,
    config: SenderConfig,
}

impl OrderSender {
    /// Create an order sender.
    #[must_use]
    pub fn new(dialer: Arc<dyn SettlementDialer>, trust: Arc<TrustPool>, config: SenderConfig) -> Self {
        Self {
            dialer,
            trust,
            config,
        }
    }

    /// Settle a batch of archived orders with one satellite.
    ///
    /// Returns the per-serial statuses reported by the satellite.
    /// Serials missing from the result received no response (the
    /// satellite hung up early, or the per-response timeout fired);
    /// the caller keeps those orders for a later pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the satellite is not trusted, the dial
    /// fails or times out, or the stream breaks before EOF.
    pub async fn settle(
        &self,
        satellite_id: NodeId,
        orders: &[ArchivedOrder],
    ) -> Result<HashMap<SerialNumber, SettlementStatus>> {
        let address = self.trust.address(satellite_id)?;

        let mut stream = with_timeout(
            self.config.dial_timeout(),
            "settlement dial",
            self.dialer.dial(satellite_id, &address),
        )
        .await?;

        debug!(satellite = %satellite_id, count = orders.len(), "settling orders");

        for archived in orders {
            stream
                .send(SettlementRequest::new(
                    archived.limit.clone(),
                    archived.order.clone(),
                ))
                .await?;
        }
        stream.close_send().await?;

        let mut statuses = HashMap::new();
        loop {
            let response = with_timeout(
                self.config.request_timeout(),
                "settlement response",
                stream.recv(),
            )
            .await?;
            match response {
                Some(response) => {
                    statuses.insert(response.serial_number, response.status);
                }
                None => break,
            }
        }

        let accepted = statuses
            .values()
            .filter(|status| **status == SettlementStatus::Accepted)
            .count();
        info!(
            satellite = %satellite_id,
            accepted,
            rejected = statuses.len() - accepted,
            unanswered = orders.len().saturating_sub(statuses.len()),
            "settlement pass finished"
        );

        Ok(statuses)
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(format!("{what} timed out"))),
    }
}
