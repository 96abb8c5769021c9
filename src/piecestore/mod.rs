//! Uplink-side piecestore client.
//!
//! Downloading is flow-controlled by the uplink: the storage node may
//! only send bytes that have been granted by a signed order, and the
//! client grows its allocation step geometrically so a long transfer
//! needs O(log n) orders while the node's maximum over-delivery stays
//! bounded.

pub mod download;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::PiecestoreConfig;
use crate::error::{Error, Result};
use crate::identity::FullIdentity;
use crate::orders::{Order, OrderLimit};

pub use download::Downloader;

/// Byte range requested from a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Offset into the piece.
    pub offset: i64,
    /// Number of bytes to download.
    pub chunk_size: i64,
}

/// One frame of the download request stream.
///
/// The first frame carries the limit and the requested range; every
/// later frame carries only an order. The variants make any other
/// sequence unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PieceDownloadRequest {
    /// Opening frame: present the limit and the requested range.
    Start {
        /// The satellite-signed order limit.
        limit: OrderLimit,
        /// The byte range to download.
        chunk: ChunkSpec,
    },
    /// Incremental signed bandwidth grant.
    Order(Order),
}

/// One frame of the download response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceDownloadResponse {
    /// The next run of piece bytes, if any.
    pub chunk: Option<Chunk>,
}

/// A run of piece bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// The bytes.
    pub data: Bytes,
}

/// Client half of a piece-download stream.
///
/// `recv` returning `Ok(None)` means the storage node closed its
/// sending direction. Transports that surface end-of-stream as an
/// error instead return [`Error::Eof`] from `recv` or `close_send`;
/// [`Downloader::close`] absorbs those while tearing down the
/// half-closed stream.
#[async_trait]
pub trait PieceStream: Send {
    /// Send one request frame.
    async fn send(&mut self, request: PieceDownloadRequest) -> Result<()>;

    /// Receive the next response frame; `None` on the peer's EOF.
    async fn recv(&mut self) -> Result<Option<PieceDownloadResponse>>;

    /// Half-close the sending direction.
    async fn close_send(&mut self) -> Result<()>;
}

/// Grow the allocation step, doubling up to `max_step`.
///
/// Pure so the growth schedule is testable in isolation.
#[must_use]
pub fn next_allocation_step(step: i64, max_step: i64) -> i64 {
    step.saturating_mul(2).min(max_step)
}

/// Uplink piecestore client.
pub struct Client {
    identity: Arc<FullIdentity>,
    config: PiecestoreConfig,
}

impl Client {
    /// Create a client signing orders with `identity`.
    #[must_use]
    pub fn new(identity: Arc<FullIdentity>, config: PiecestoreConfig) -> Self {
        Self { identity, config }
    }

    /// Start a download of `size` bytes at `offset` under the given
    /// order limit.
    ///
    /// Sends the opening frame and returns a [`Downloader`] delivering
    /// the byte stream. The allocation-step cap is clamped to the
    /// download size so a single grant never exceeds the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a negative range and a
    /// transport error if the opening frame cannot be sent.
    pub async fn download(
        &self,
        mut stream: Box<dyn PieceStream>,
        limit: OrderLimit,
        offset: i64,
        size: i64,
    ) -> Result<Downloader> {
        if offset < 0 || size < 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid download range: offset {offset}, size {size}"
            )));
        }

        debug!(piece = %limit.piece_id, offset, size, "starting download");

        if let Err(err) = stream
            .send(PieceDownloadRequest::Start {
                limit: limit.clone(),
                chunk: ChunkSpec {
                    offset,
                    chunk_size: size,
                },
            })
            .await
        {
            // drain any pending peer error before reporting
            let _ = stream.recv().await;
            return Err(err);
        }

        let max_step = self.config.max_allocation_step.min(size);
        let download = download::Download::new(
            Arc::clone(&self.identity),
            limit,
            stream,
            size,
            self.config.initial_allocation_step,
            max_step,
        );

        Ok(Downloader::new(download, self.config.download_buffer_size))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_next_allocation_step_doubles_to_cap() {
        assert_eq!(next_allocation_step(256, 1024), 512);
        assert_eq!(next_allocation_step(512, 1024), 1024);
        assert_eq!(next_allocation_step(1024, 1024), 1024);
        // a step already above the cap collapses onto it
        assert_eq!(next_allocation_step(4096, 1024), 1024);
    }

    #[test]
    fn test_next_allocation_step_saturates() {
        assert_eq!(next_allocation_step(i64::MAX / 2 + 1, i64::MAX), i64::MAX);
    }
}
