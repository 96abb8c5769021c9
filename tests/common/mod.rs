//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use meridian_node::orders::signing::{sign_order, sign_order_limit};
use meridian_node::orders::BucketId;
use meridian_node::{
    FullIdentity, NodeId, Order, OrderLimit, PieceAction, PieceId, SerialNumber,
};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bucket used across the settlement scenarios.
pub fn test_bucket() -> BucketId {
    BucketId {
        project_id: [0xAA; 16],
        bucket_name: "backups".to_string(),
    }
}

/// Sign a (limit, order) pair for `amount` bytes against a fresh serial.
pub fn signed_pair(
    satellite: &FullIdentity,
    uplink: &FullIdentity,
    storage_node: NodeId,
    serial: SerialNumber,
    amount: i64,
    order_expiration: SystemTime,
) -> (OrderLimit, Order) {
    let limit = sign_order_limit(
        satellite,
        OrderLimit {
            serial_number: serial,
            satellite_id: satellite.node_id(),
            storage_node_id: storage_node,
            uplink_public_key: uplink.public_key_bytes(),
            piece_id: PieceId::random(),
            action: PieceAction::Get,
            limit: 1_000,
            order_expiration,
            limit_expiration: order_expiration + Duration::from_secs(3600),
            satellite_signature: Vec::new(),
        },
    )
    .expect("sign limit");

    let order = sign_order(
        uplink,
        Order {
            serial_number: serial,
            amount,
            uplink_signature: Vec::new(),
        },
    )
    .expect("sign order");

    (limit, order)
}

/// A piece of `size` patterned bytes for download scenarios.
pub fn patterned_piece(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Fresh satellite + uplink + storage-node identities.
pub fn identities() -> (Arc<FullIdentity>, Arc<FullIdentity>, Arc<FullIdentity>) {
    (
        Arc::new(FullIdentity::generate()),
        Arc::new(FullIdentity::generate()),
        Arc::new(FullIdentity::generate()),
    )
}
