//! Canonical signing of order limits and orders.
//!
//! The signature domain is the bincode encoding of every field except
//! the signature itself, in declaration order. Signatures are ECDSA
//! over secp256k1 and deterministic (RFC 6979), so re-signing the same
//! payload with the same key yields the same bytes.

use bincode::Options;
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};

use crate::error::{Error, Result};
use crate::identity::{parse_public_key, FullIdentity};
use crate::orders::{Order, OrderLimit};

/// Upper bound on a canonical encoding. An order limit is a few hundred
/// bytes; anything near this limit is malformed.
const MAX_SIGNING_SIZE: u64 = 64 * 1024;

/// Bincode options for the canonical signing serialization.
fn signing_options() -> impl Options {
    bincode::options()
        .with_limit(MAX_SIGNING_SIZE)
        .with_fixint_encoding()
        .with_little_endian()
}

/// Canonical signable bytes of an order limit (signature elided).
///
/// # Errors
///
/// Returns [`Error::Serialization`] if encoding fails.
pub fn order_limit_signable_bytes(limit: &OrderLimit) -> Result<Vec<u8>> {
    signing_options()
        .serialize(&(
            &limit.serial_number,
            &limit.satellite_id,
            &limit.storage_node_id,
            &limit.uplink_public_key,
            &limit.piece_id,
            &limit.action,
            limit.limit,
            &limit.order_expiration,
            &limit.limit_expiration,
        ))
        .map_err(|e| Error::Serialization(format!("order limit: {e}")))
}

/// Canonical signable bytes of an order (signature elided).
///
/// # Errors
///
/// Returns [`Error::Serialization`] if encoding fails.
pub fn order_signable_bytes(order: &Order) -> Result<Vec<u8>> {
    signing_options()
        .serialize(&(&order.serial_number, order.amount))
        .map_err(|e| Error::Serialization(format!("order: {e}")))
}

/// Sign an order limit with the satellite's identity.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the canonical encoding fails.
pub fn sign_order_limit(satellite: &FullIdentity, mut limit: OrderLimit) -> Result<OrderLimit> {
    let bytes = order_limit_signable_bytes(&limit)?;
    limit.satellite_signature = satellite.sign(&bytes);
    Ok(limit)
}

/// Sign an order with the uplink's identity.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the canonical encoding fails.
pub fn sign_order(uplink: &FullIdentity, mut order: Order) -> Result<Order> {
    let bytes = order_signable_bytes(&order)?;
    order.uplink_signature = uplink.sign(&bytes);
    Ok(order)
}

fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8], what: &str) -> Result<()> {
    let signature = Signature::from_slice(signature)
        .map_err(|_| Error::BadSignature(format!("malformed {what} signature")))?;
    key.verify(message, &signature)
        .map_err(|_| Error::BadSignature(format!("{what} signature does not verify")))
}

/// Verify that `signee` signed the order limit.
///
/// # Errors
///
/// Returns [`Error::BadSignature`] if the signature is malformed or was
/// not produced by `signee` over the canonical encoding.
pub fn verify_order_limit_signature(signee: &VerifyingKey, limit: &OrderLimit) -> Result<()> {
    let bytes = order_limit_signable_bytes(limit)?;
    verify(signee, &bytes, &limit.satellite_signature, "order limit")
}

/// Verify an order against the uplink public key embedded in its limit.
///
/// # Errors
///
/// Returns [`Error::BadSignature`] if the key bytes are invalid or the
/// signature does not verify.
pub fn verify_uplink_order_signature(uplink_public_key: &[u8], order: &Order) -> Result<()> {
    let key = parse_public_key(uplink_public_key)?;
    let bytes = order_signable_bytes(order)?;
    verify(&key, &bytes, &order.uplink_signature, "order")
}
