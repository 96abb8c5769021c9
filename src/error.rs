//! Error types for meridian-node.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in meridian-node.
///
/// Settlement distinguishes soft failures (emitted as a `REJECTED`
/// response while the stream continues) from stream-fatal ones; the
/// split lives in [`crate::orders::endpoint`], not here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or wrong peer identity on a stream.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Malformed frame or request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Signature did not verify against the expected signee.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// The order limit's order-expiration has passed.
    #[error("order limit expired")]
    ExpiredLimit,

    /// The serial number on the order does not match the limit.
    #[error("serial number mismatch between limit and order")]
    SerialMismatch,

    /// The serial number was already consumed by another settlement.
    #[error("serial number already used: {0}")]
    SerialReused(String),

    /// The serial number's limit-expiration has passed.
    #[error("serial number expired: {0}")]
    SerialExpired(String),

    /// The serial number is not known to the satellite.
    #[error("serial number not found: {0}")]
    SerialNotFound(String),

    /// A zero node id was supplied where a real one is required.
    #[error("node id is zero")]
    EmptyNode,

    /// The node is not known to the overlay.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The satellite is not in the trust pool.
    #[error("trust pool: {0}")]
    Trust(String),

    /// Transport-level failure (dial, send, recv).
    #[error("transport: {0}")]
    Transport(String),

    /// Persistence-layer failure.
    #[error("database: {0}")]
    Db(String),

    /// Wire-protocol violation.
    #[error("protocol: {0}")]
    Protocol(String),

    /// The stream ended. Benign while tearing down a half-closed
    /// stream; mid-transfer it is treated as a broken download.
    #[error("end of stream")]
    Eof,

    /// Canonical serialization failed.
    #[error("serialization: {0}")]
    Serialization(String),

    /// The operation was canceled by shutdown.
    #[error("operation canceled")]
    Canceled,

    /// Infrastructure failure not covered by a more specific kind.
    #[error("internal error: {0}")]
    Internal(String),
}
