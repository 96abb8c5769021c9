//! Download state machine: order grants out, data chunks in.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{FullIdentity, NodeId};
use crate::orders::signing::sign_order;
use crate::orders::{Order, OrderLimit, PieceId};
use crate::piecestore::{next_allocation_step, PieceDownloadRequest, PieceStream};

/// Single-slot buffer holding the most recent unread chunk plus a
/// latched error.
///
/// Once an error is latched the pump stops talking to the peer, but
/// already-buffered bytes still drain to the caller; the error
/// surfaces on the first read that finds the buffer empty.
#[derive(Default)]
struct ReadBuffer {
    data: Bytes,
    err: Option<Error>,
}

impl ReadBuffer {
    fn errored(&self) -> bool {
        self.err.is_some()
    }

    fn error(&self) -> Option<Error> {
        self.err.clone()
    }

    /// Latch an error; the first one wins.
    fn include_error(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn fill(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Copy buffered bytes out; returns how many were copied.
    fn copy_out(&mut self, out: &mut [u8]) -> usize {
        let n = self.data.len().min(out.len());
        if n > 0 {
            out[..n].copy_from_slice(&self.data.split_to(n));
        }
        n
    }
}

/// Raw download pump over one piece stream.
pub(crate) struct Download {
    identity: Arc<FullIdentity>,
    limit: OrderLimit,
    stream: Box<dyn PieceStream>,

    read: i64,
    allocated: i64,
    downloaded: i64,
    download_size: i64,

    allocation_step: i64,
    max_allocation_step: i64,

    unread: ReadBuffer,
}

impl Download {
    pub(crate) fn new(
        identity: Arc<FullIdentity>,
        limit: OrderLimit,
        stream: Box<dyn PieceStream>,
        download_size: i64,
        initial_allocation_step: i64,
        max_allocation_step: i64,
    ) -> Self {
        Self {
            identity,
            limit,
            stream,
            read: 0,
            allocated: 0,
            downloaded: 0,
            download_size,
            allocation_step: initial_allocation_step,
            max_allocation_step,
            unread: ReadBuffer::default(),
        }
    }

    /// Read downloaded bytes, granting allocations as necessary.
    ///
    /// Returns `Ok(0)` once `download_size` bytes have been delivered.
    pub(crate) async fn read(&mut self, data: &mut [u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut read: usize = 0;
        while self.read < self.download_size {
            // drain the buffer first
            let n = self.unread.copy_out(&mut data[read..]);
            self.read += n as i64;
            read += n;

            // a latched error stops all further communication, but the
            // caller still gets the bytes that already arrived
            if self.unread.errored() {
                if read > 0 {
                    return Ok(read);
                }
                return Err(self.unread.error().unwrap_or(Error::Canceled));
            }

            // grant more bandwidth when the window runs low
            if self.allocated - self.downloaded < self.allocation_step {
                let mut new_allocation = self.allocation_step;

                // a generous storage node may have over-delivered
                if self.allocated - self.downloaded < 0 {
                    new_allocation += self.downloaded - self.allocated;
                }

                // never allocate past what we intend to read
                if self.allocated + new_allocation > self.download_size {
                    new_allocation = self.download_size - self.allocated;
                }

                if new_allocation > 0 {
                    let order = match sign_order(
                        &self.identity,
                        Order {
                            serial_number: self.limit.serial_number,
                            amount: new_allocation,
                            uplink_signature: Vec::new(),
                        },
                    ) {
                        Ok(order) => order,
                        Err(err) => {
                            self.unread.include_error(err);
                            return Ok(read);
                        }
                    };

                    if let Err(err) = self.stream.send(PieceDownloadRequest::Order(order)).await {
                        // the peer hung up or the network went away
                        self.unread.include_error(err);
                        return Ok(read);
                    }

                    self.allocated += new_allocation;
                    self.allocation_step =
                        next_allocation_step(self.allocation_step, self.max_allocation_step);
                }
            }

            // hand back what we already have rather than waiting
            if read > 0 {
                return Ok(read);
            }

            match self.stream.recv().await {
                Ok(Some(response)) => {
                    if let Some(chunk) = response.chunk {
                        self.downloaded += chunk.data.len() as i64;
                        self.unread.fill(chunk.data);
                    }
                }
                Ok(None) | Err(Error::Eof) => {
                    self.unread.include_error(Error::Protocol(
                        "stream closed before download completed".to_string(),
                    ));
                }
                Err(err) => {
                    self.unread.include_error(err);
                }
            }
        }

        Ok(read)
    }

    /// Shut the stream down.
    pub(crate) async fn close(mut self) -> Result<()> {
        let all_done = self.read == self.download_size;
        let node = self.limit.storage_node_id;
        let piece = self.limit.piece_id;

        // close our sending end, then drain any pending peer error;
        // the half-closed stream is expected to EOF on both directions
        let close_result = ignore_eof(self.stream.close_send().await);
        let recv_result = ignore_eof(self.stream.recv().await.map(|_| ()));
        let teardown = match (close_result, recv_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(close_err), Err(recv_err)) => Err(combine_errors(close_err, &recv_err)),
        };

        if all_done {
            return teardown.map_err(|err| attach_context(err, node, piece));
        }

        if let Some(err) = self.unread.error() {
            // the download broke before completing; a genuine teardown
            // failure rides along with the latched error
            let err = match teardown {
                Ok(()) => err,
                Err(teardown_err) => combine_errors(err, &teardown_err),
            };
            return Err(attach_context(err, node, piece));
        }

        // caller closed early; EOFs were already absorbed above
        debug!(piece = %piece, read = self.read, of = self.download_size, "download closed early");
        teardown.map_err(|err| attach_context(err, node, piece))
    }

    fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            read: self.read,
            allocated: self.allocated,
            downloaded: self.downloaded,
            download_size: self.download_size,
        }
    }
}

fn attach_context(err: Error, node: NodeId, piece: PieceId) -> Error {
    match err {
        Error::Transport(msg) => Error::Transport(format!("(node {node}, piece {piece}) {msg}")),
        Error::Protocol(msg) => Error::Protocol(format!("(node {node}, piece {piece}) {msg}")),
        Error::Internal(msg) => Error::Internal(format!("(node {node}, piece {piece}) {msg}")),
        other => other,
    }
}

/// Benign end-of-stream signals are expected during teardown.
fn ignore_eof(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Eof) => Ok(()),
        other => other,
    }
}

/// Fold a second failure into the first, keeping the first one's kind.
fn combine_errors(primary: Error, secondary: &Error) -> Error {
    match primary {
        Error::Transport(msg) => Error::Transport(format!("{msg}; {secondary}")),
        Error::Protocol(msg) => Error::Protocol(format!("{msg}; {secondary}")),
        Error::Serialization(msg) => Error::Serialization(format!("{msg}; {secondary}")),
        Error::BadSignature(msg) => Error::BadSignature(format!("{msg}; {secondary}")),
        Error::Internal(msg) => Error::Internal(format!("{msg}; {secondary}")),
        other => {
            // unit-kind errors cannot carry the extra message
            debug!(%secondary, "dropping secondary teardown error");
            other
        }
    }
}

/// Counters describing a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes handed to the caller.
    pub read: i64,
    /// Bytes granted through signed orders.
    pub allocated: i64,
    /// Bytes received from the storage node.
    pub downloaded: i64,
    /// Bytes requested for the session.
    pub download_size: i64,
}

/// Buffer between the raw pump and the consumer.
struct BufferedDownload {
    raw: Download,
    capacity: usize,
    buffer: Vec<u8>,
    pos: usize,
}

impl BufferedDownload {
    fn new(raw: Download, capacity: usize) -> Self {
        Self {
            raw,
            capacity,
            buffer: Vec::new(),
            pos: 0,
        }
    }

    async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        if self.pos >= self.buffer.len() {
            self.buffer.resize(self.capacity, 0);
            self.pos = 0;
            let n = self.raw.read(&mut self.buffer).await?;
            self.buffer.truncate(n);
            if n == 0 {
                return Ok(0);
            }
        }

        let n = out.len().min(self.buffer.len() - self.pos);
        out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

enum Inner {
    Plain(Download),
    Buffered(BufferedDownload),
}

/// Handle to an in-flight download.
///
/// Concurrent reads are serialized behind a mutex; the stream is
/// inherently sequential, so only one read can make progress anyway.
pub struct Downloader {
    inner: Mutex<Inner>,
}

impl Downloader {
    pub(crate) fn new(download: Download, download_buffer_size: i64) -> Self {
        let capacity = usize::try_from(download_buffer_size).unwrap_or(0);
        let inner = if capacity > 0 {
            Inner::Buffered(BufferedDownload::new(download, capacity))
        } else {
            Inner::Plain(download)
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Read the next run of bytes; `Ok(0)` at the end of the download.
    ///
    /// # Errors
    ///
    /// Returns the latched download error once buffered data is
    /// exhausted.
    pub async fn read(&self, out: &mut [u8]) -> Result<usize> {
        match &mut *self.inner.lock().await {
            Inner::Plain(download) => download.read(out).await,
            Inner::Buffered(buffered) => buffered.read(out).await,
        }
    }

    /// Current session counters.
    pub async fn progress(&self) -> DownloadProgress {
        match &*self.inner.lock().await {
            Inner::Plain(download) => download.progress(),
            Inner::Buffered(buffered) => buffered.raw.progress(),
        }
    }

    /// Close the download.
    ///
    /// Completing downloads expect EOF on both directions; an early
    /// close absorbs the EOFs of the half-closed stream; a broken
    /// download returns the latched error with node and piece attached.
    ///
    /// # Errors
    ///
    /// Returns the latched error for downloads that broke partway.
    pub async fn close(self) -> Result<()> {
        match self.inner.into_inner() {
            Inner::Plain(download) => download.close().await,
            Inner::Buffered(buffered) => buffered.raw.close().await,
        }
    }
}
