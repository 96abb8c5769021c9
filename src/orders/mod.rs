//! Bandwidth orders: limits, orders, and the settlement pipeline.
//!
//! An **order limit** is a satellite-signed grant authorizing a storage
//! node to serve up to `limit` bytes for one action, identified by a
//! serial number. An **order** is an uplink-signed receipt consuming
//! part of that grant. Storage nodes later redeem collected orders at
//! the satellite's settlement endpoint, which credits bandwidth
//! exactly once per serial.
//!
//! Submodules:
//! - [`signing`]: canonical signable encoding, sign/verify
//! - [`endpoint`]: satellite-side streaming settlement endpoint
//! - [`sender`]: storage-node-side settlement sender
//! - [`db`]: persistence contract and the in-memory implementation
//! - [`sweeper`]: background expired-serial sweep

pub mod db;
pub mod endpoint;
pub mod sender;
pub mod signing;
pub mod sweeper;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::identity::NodeId;

/// Opaque serial number, unique across a satellite's issuance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber([u8; 16]);

impl SerialNumber {
    /// Construct a serial number from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a random serial number.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// The raw bytes of the serial number.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", hex::encode(&self.0[..8]))
    }
}

/// Content identifier of a stored piece.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceId([u8; 32]);

impl PieceId {
    /// Construct a piece id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random piece id.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// The raw bytes of the piece id.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceId({})", hex::encode(&self.0[..8]))
    }
}

/// The action an order limit authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceAction {
    /// Serve piece data to an uplink.
    Get,
    /// Accept piece data from an uplink.
    Put,
    /// Serve piece data for an audit.
    GetAudit,
    /// Serve piece data for repair traffic.
    GetRepair,
    /// Accept piece data for repair traffic.
    PutRepair,
    /// Delete a piece.
    Delete,
}

impl fmt::Display for PieceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::GetAudit => "get_audit",
            Self::GetRepair => "get_repair",
            Self::PutRepair => "put_repair",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Bucket identifier: project plus bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId {
    /// Owning project.
    pub project_id: [u8; 16],
    /// Bucket name within the project.
    pub bucket_name: String,
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", hex::encode(self.project_id), self.bucket_name)
    }
}

/// Satellite-signed grant authorizing a transfer.
///
/// Immutable once signed; every field except `satellite_signature` is
/// covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLimit {
    /// Serial number tying the limit to one settlement.
    pub serial_number: SerialNumber,
    /// The satellite that issued and signed the limit.
    pub satellite_id: NodeId,
    /// The only storage node allowed to settle this limit.
    pub storage_node_id: NodeId,
    /// SEC1 public key of the uplink that may issue orders.
    pub uplink_public_key: Vec<u8>,
    /// The piece this limit covers.
    pub piece_id: PieceId,
    /// Authorized action.
    pub action: PieceAction,
    /// Maximum number of bytes the orders may sum to.
    pub limit: i64,
    /// Orders against this limit must be settled before this time.
    pub order_expiration: SystemTime,
    /// The serial entry itself expires at this time.
    pub limit_expiration: SystemTime,
    /// Satellite signature over the canonical encoding.
    pub satellite_signature: Vec<u8>,
}

/// Uplink-signed receipt consuming bandwidth against a limit.
///
/// Issued repeatedly per limit; each order's `amount` is the increment
/// granted by that order, and the running sum stays within
/// `limit.limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Serial number of the limit being consumed.
    pub serial_number: SerialNumber,
    /// Bytes granted by this order.
    pub amount: i64,
    /// Uplink signature over the canonical encoding.
    pub uplink_signature: Vec<u8>,
}

/// One frame of the settlement request stream.
///
/// Both fields are required; a frame missing either is malformed and
/// terminates the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// The satellite-signed limit.
    pub limit: Option<OrderLimit>,
    /// The uplink-signed order.
    pub order: Option<Order>,
}

impl SettlementRequest {
    /// Build a well-formed request from a limit and an order.
    #[must_use]
    pub fn new(limit: OrderLimit, order: Order) -> Self {
        Self {
            limit: Some(limit),
            order: Some(order),
        }
    }
}

/// Outcome of settling one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// The serial was consumed and bandwidth credited.
    Accepted,
    /// The order was rejected; the stream continues.
    Rejected,
}

/// One frame of the settlement response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResponse {
    /// Serial number the response refers to.
    pub serial_number: SerialNumber,
    /// Settlement outcome.
    pub status: SettlementStatus,
}

/// A validated (order, limit) pair queued for batch processing.
#[derive(Debug, Clone)]
pub struct ProcessOrderRequest {
    /// The uplink-signed order.
    pub order: Order,
    /// The satellite-signed limit it consumes.
    pub order_limit: OrderLimit,
}

/// Per-request result of a batch [`db::OrdersDb::process_orders`] call.
#[derive(Debug, Clone)]
pub struct ProcessOrderResponse {
    /// Serial number the result refers to.
    pub serial_number: SerialNumber,
    /// Settlement outcome.
    pub status: SettlementStatus,
}
