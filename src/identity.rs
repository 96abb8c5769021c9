//! Node identities and ECDSA keys.
//!
//! Every peer in the network is identified by a [`NodeId`] derived from
//! its secp256k1 public key. A [`FullIdentity`] additionally holds the
//! private key and can produce deterministic (RFC 6979) signatures.

use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};

/// Opaque 32-byte node identifier. The zero value is invalid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Construct a node id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the node id from a public key: SHA-256 of the compressed
    /// SEC1 encoding.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.to_encoded_point(true).as_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        Self(id)
    }

    /// The raw bytes of the id.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the invalid zero id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

/// The identity of an already-authenticated peer, as extracted from the
/// mutual-TLS transport context by the stream implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The peer's node id.
    pub id: NodeId,
}

/// A full identity: node id plus the ECDSA private key.
pub struct FullIdentity {
    id: NodeId,
    signing_key: SigningKey,
}

impl FullIdentity {
    /// Generate a fresh identity from the OS entropy source.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Build an identity around an existing private key.
    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let id = NodeId::from_public_key(signing_key.verifying_key());
        Self { id, signing_key }
    }

    /// The node id derived from this identity's public key.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.id
    }

    /// The public verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Compressed SEC1 encoding of the public key, as embedded in order
    /// limits.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    /// The peer-identity view of this identity.
    #[must_use]
    pub const fn peer_identity(&self) -> PeerIdentity {
        PeerIdentity { id: self.id }
    }

    /// Sign a message deterministically with the private key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes().to_vec()
    }
}

impl fmt::Debug for FullIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        f.debug_struct("FullIdentity").field("id", &self.id).finish()
    }
}

/// Parse a compressed or uncompressed SEC1 public key.
///
/// # Errors
///
/// Returns [`Error::BadSignature`] if the bytes are not a valid point.
pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|e| Error::BadSignature(format!("invalid public key: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_is_stable_per_key() {
        let identity = FullIdentity::generate();
        let again = NodeId::from_public_key(&identity.verifying_key());
        assert_eq!(identity.node_id(), again);
        assert!(!identity.node_id().is_zero());
    }

    #[test]
    fn test_distinct_identities_have_distinct_ids() {
        let a = FullIdentity::generate();
        let b = FullIdentity::generate();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_public_key_round_trip() {
        let identity = FullIdentity::generate();
        let bytes = identity.public_key_bytes();
        let parsed = parse_public_key(&bytes).expect("valid key");
        assert_eq!(NodeId::from_public_key(&parsed), identity.node_id());
    }

    #[test]
    fn test_parse_public_key_rejects_garbage() {
        assert!(parse_public_key(&[0xFF; 33]).is_err());
        assert!(parse_public_key(&[]).is_err());
    }

    #[test]
    fn test_zero_id() {
        assert!(NodeId::from_bytes([0u8; 32]).is_zero());
        assert!(!NodeId::from_bytes([1u8; 32]).is_zero());
    }
}
