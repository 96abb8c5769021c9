//! Trust pool: the set of satellites a storage node works with.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::identity::NodeId;

/// Configured satellites, keyed by node id.
#[derive(Debug, Default)]
pub struct TrustPool {
    satellites: RwLock<HashMap<NodeId, String>>,
}

impl TrustPool {
    /// Build a pool from (satellite id, address) entries.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        Self {
            satellites: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Look up the address of a trusted satellite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trust`] if the satellite is not in the pool.
    pub fn address(&self, satellite_id: NodeId) -> Result<String> {
        self.satellites
            .read()
            .get(&satellite_id)
            .cloned()
            .ok_or_else(|| Error::Trust(format!("unable to find satellite {satellite_id}")))
    }

    /// All trusted satellite ids.
    #[must_use]
    pub fn satellites(&self) -> Vec<NodeId> {
        self.satellites.read().keys().copied().collect()
    }

    /// Add or update a satellite entry.
    pub fn insert(&self, satellite_id: NodeId, address: String) {
        self.satellites.write().insert(satellite_id, address);
    }
}
