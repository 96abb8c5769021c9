//! In-process stream pairs.
//!
//! These connect the client and server halves of the settlement and
//! piece-download streams through bounded channels, standing in for the
//! mutual-TLS transport in wiring and tests. The server half carries
//! the peer identity the real transport would have authenticated.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{NodeId, PeerIdentity};
use crate::orders::endpoint::{Endpoint, SettlementStream};
use crate::orders::sender::{SettlementClientStream, SettlementDialer};
use crate::orders::{SettlementRequest, SettlementResponse};
use crate::piecestore::{PieceDownloadRequest, PieceDownloadResponse, PieceStream};

/// Build a connected settlement stream pair. The server half reports
/// `peer` as the authenticated peer identity.
#[must_use]
pub fn settlement_pipe(
    peer: PeerIdentity,
    capacity: usize,
) -> (SettlementClientPipe, SettlementServerPipe) {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let (response_tx, response_rx) = mpsc::channel(capacity.max(1));
    (
        SettlementClientPipe {
            requests: Some(request_tx),
            responses: response_rx,
        },
        SettlementServerPipe {
            peer: Some(peer),
            requests: request_rx,
            responses: response_tx,
        },
    )
}

/// Client half of an in-process settlement stream.
pub struct SettlementClientPipe {
    requests: Option<mpsc::Sender<SettlementRequest>>,
    responses: mpsc::Receiver<SettlementResponse>,
}

#[async_trait]
impl SettlementClientStream for SettlementClientPipe {
    async fn send(&mut self, request: SettlementRequest) -> Result<()> {
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Transport("send after close".to_string()))?;
        tx.send(request)
            .await
            .map_err(|_| Error::Transport("settlement stream closed".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<SettlementResponse>> {
        Ok(self.responses.recv().await)
    }

    async fn close_send(&mut self) -> Result<()> {
        self.requests = None;
        Ok(())
    }
}

/// Server half of an in-process settlement stream.
pub struct SettlementServerPipe {
    peer: Option<PeerIdentity>,
    requests: mpsc::Receiver<SettlementRequest>,
    responses: mpsc::Sender<SettlementResponse>,
}

impl SettlementServerPipe {
    /// Drop the authenticated peer, simulating a transport that failed
    /// to produce one.
    pub fn clear_peer_identity(&mut self) {
        self.peer = None;
    }
}

#[async_trait]
impl SettlementStream for SettlementServerPipe {
    fn peer_identity(&self) -> Option<PeerIdentity> {
        self.peer
    }

    async fn recv(&mut self) -> Result<Option<SettlementRequest>> {
        Ok(self.requests.recv().await)
    }

    async fn send(&mut self, response: SettlementResponse) -> Result<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| Error::Transport("settlement response undeliverable".to_string()))
    }
}

/// Build a connected piece-download stream pair.
#[must_use]
pub fn piece_pipe(capacity: usize) -> (PieceClientPipe, PieceServerPipe) {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let (response_tx, response_rx) = mpsc::channel(capacity.max(1));
    (
        PieceClientPipe {
            requests: Some(request_tx),
            responses: response_rx,
        },
        PieceServerPipe {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

/// Client half of an in-process piece-download stream.
pub struct PieceClientPipe {
    requests: Option<mpsc::Sender<PieceDownloadRequest>>,
    responses: mpsc::Receiver<PieceDownloadResponse>,
}

#[async_trait]
impl PieceStream for PieceClientPipe {
    async fn send(&mut self, request: PieceDownloadRequest) -> Result<()> {
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Transport("send after close".to_string()))?;
        tx.send(request)
            .await
            .map_err(|_| Error::Transport("piece stream closed".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<PieceDownloadResponse>> {
        Ok(self.responses.recv().await)
    }

    async fn close_send(&mut self) -> Result<()> {
        self.requests = None;
        Ok(())
    }
}

/// Server half of an in-process piece-download stream, used by
/// storage-node doubles.
pub struct PieceServerPipe {
    requests: mpsc::Receiver<PieceDownloadRequest>,
    responses: mpsc::Sender<PieceDownloadResponse>,
}

impl PieceServerPipe {
    /// Receive the next request frame; `None` when the client
    /// half-closed.
    pub async fn recv(&mut self) -> Option<PieceDownloadRequest> {
        self.requests.recv().await
    }

    /// Send a response frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the client is gone.
    pub async fn send(&mut self, response: PieceDownloadResponse) -> Result<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| Error::Transport("piece response undeliverable".to_string()))
    }
}

/// Dialer that connects straight to a local [`Endpoint`], one spawned
/// stream task per dial.
pub struct ChannelSettlementDialer {
    endpoint: Arc<Endpoint>,
    node: PeerIdentity,
}

impl ChannelSettlementDialer {
    /// Create a dialer for the given endpoint, authenticating every
    /// stream as `node`.
    #[must_use]
    pub fn new(endpoint: Arc<Endpoint>, node: PeerIdentity) -> Self {
        Self { endpoint, node }
    }
}

#[async_trait]
impl SettlementDialer for ChannelSettlementDialer {
    async fn dial(
        &self,
        satellite_id: NodeId,
        _address: &str,
    ) -> Result<Box<dyn SettlementClientStream>> {
        let (client, mut server) = settlement_pipe(self.node, 16);
        let endpoint = Arc::clone(&self.endpoint);
        tokio::spawn(async move {
            if let Err(err) = endpoint.settlement(&mut server).await {
                debug!(satellite = %satellite_id, %err, "settlement stream ended with error");
            }
        });
        Ok(Box::new(client))
    }
}
