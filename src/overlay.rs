//! In-memory overlay of node dossiers.
//!
//! The index map is under a reader-writer lock; each dossier has its
//! own exclusive lock, so updates to different nodes proceed in
//! parallel while updates to one node serialize.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

use crate::config::ReputationConfig;
use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::reputation::{reputation_score, update_reputation, NodeStats};

/// A storage node's record at the satellite.
#[derive(Debug, Clone)]
pub struct NodeDossier {
    /// The node's id.
    pub id: NodeId,
    /// Last known dial address.
    pub address: String,
    /// Reputation state.
    pub reputation: NodeStats,
    /// When the node was first sighted.
    pub created_at: SystemTime,
}

/// Audit outcome applied through [`Inmemory::update_stats`].
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest {
    /// The node the outcomes belong to.
    pub node_id: NodeId,
    /// Whether the audit succeeded.
    pub audit_success: bool,
    /// Whether the node answered the accompanying contact.
    pub is_up: bool,
}

/// In-memory node-dossier store.
pub struct Inmemory {
    nodes: RwLock<HashMap<NodeId, Arc<Mutex<NodeDossier>>>>,
    defaults: ReputationConfig,
}

impl Inmemory {
    /// Create an empty overlay seeding new nodes from `defaults`.
    #[must_use]
    pub fn new(defaults: ReputationConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    fn lookup(&self, node_id: NodeId) -> Option<Arc<Mutex<NodeDossier>>> {
        self.nodes.read().get(&node_id).cloned()
    }

    /// Update a node's address, inserting the dossier with configured
    /// priors on first sighting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyNode`] for the zero id.
    pub fn update_address(&self, node_id: NodeId, address: &str) -> Result<()> {
        if node_id.is_zero() {
            return Err(Error::EmptyNode);
        }

        // fast path: the node is already known
        if let Some(dossier) = self.lookup(node_id) {
            dossier.lock().address = address.to_string();
            return Ok(());
        }

        let mut nodes = self.nodes.write();
        // racing inserts resolve to whoever got the write lock first
        if let Some(dossier) = nodes.get(&node_id) {
            dossier.lock().address = address.to_string();
            return Ok(());
        }

        nodes.insert(
            node_id,
            Arc::new(Mutex::new(NodeDossier {
                id: node_id,
                address: address.to_string(),
                reputation: NodeStats::with_priors(
                    self.defaults.audit_reputation_alpha_0,
                    self.defaults.audit_reputation_beta_0,
                    self.defaults.uptime_reputation_alpha_0,
                    self.defaults.uptime_reputation_beta_0,
                ),
                created_at: SystemTime::now(),
            })),
        );
        Ok(())
    }

    /// Snapshot a node's dossier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyNode`] or [`Error::NodeNotFound`].
    pub fn get(&self, node_id: NodeId) -> Result<NodeDossier> {
        if node_id.is_zero() {
            return Err(Error::EmptyNode);
        }
        let dossier = self
            .lookup(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let snapshot = dossier.lock().clone();
        Ok(snapshot)
    }

    /// Apply one uptime probe outcome.
    ///
    /// The channel is updated even for an already-disqualified node;
    /// disqualification itself is write-once and never cleared.
    /// Returns a snapshot of the resulting stats.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyNode`] or [`Error::NodeNotFound`].
    pub fn update_uptime(
        &self,
        node_id: NodeId,
        is_up: bool,
        lambda: f64,
        weight: f64,
        uptime_dq: f64,
    ) -> Result<NodeStats> {
        if node_id.is_zero() {
            return Err(Error::EmptyNode);
        }
        let dossier = self
            .lookup(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;

        let mut dossier = dossier.lock();
        let reputation = &mut dossier.reputation;

        let (alpha, beta, total) = update_reputation(
            is_up,
            reputation.uptime_reputation_alpha,
            reputation.uptime_reputation_beta,
            lambda,
            weight,
            reputation.uptime_count,
        );
        reputation.uptime_reputation_alpha = alpha;
        reputation.uptime_reputation_beta = beta;
        reputation.uptime_count = total;

        if reputation_score(alpha, beta) <= uptime_dq && reputation.disqualified.is_none() {
            reputation.disqualified = Some(SystemTime::now());
            info!(node = %node_id, score = reputation_score(alpha, beta),
                "node disqualified on uptime reputation");
        }

        let now = SystemTime::now();
        if is_up {
            reputation.uptime_success_count += 1;
            reputation.last_contact_success = Some(now);
        } else {
            reputation.last_contact_failure = Some(now);
        }

        Ok(reputation.clone())
    }

    /// Apply one audit outcome together with its contact result, using
    /// the configured tuning for both channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyNode`] or [`Error::NodeNotFound`].
    pub fn update_stats(&self, request: &UpdateRequest) -> Result<NodeStats> {
        if request.node_id.is_zero() {
            return Err(Error::EmptyNode);
        }
        let dossier = self
            .lookup(request.node_id)
            .ok_or_else(|| Error::NodeNotFound(request.node_id.to_string()))?;

        let mut dossier = dossier.lock();
        let reputation = &mut dossier.reputation;

        let (alpha, beta, total) = update_reputation(
            request.audit_success,
            reputation.audit_reputation_alpha,
            reputation.audit_reputation_beta,
            self.defaults.audit_lambda,
            self.defaults.audit_weight,
            reputation.audit_count,
        );
        reputation.audit_reputation_alpha = alpha;
        reputation.audit_reputation_beta = beta;
        reputation.audit_count = total;
        if request.audit_success {
            reputation.audit_success_count += 1;
        }

        let (alpha, beta, total) = update_reputation(
            request.is_up,
            reputation.uptime_reputation_alpha,
            reputation.uptime_reputation_beta,
            self.defaults.uptime_lambda,
            self.defaults.uptime_weight,
            reputation.uptime_count,
        );
        reputation.uptime_reputation_alpha = alpha;
        reputation.uptime_reputation_beta = beta;
        reputation.uptime_count = total;

        let audit_dq = reputation.audit_score() <= self.defaults.audit_dq;
        let uptime_dq = reputation.uptime_score() <= self.defaults.uptime_dq;
        if (audit_dq || uptime_dq) && reputation.disqualified.is_none() {
            reputation.disqualified = Some(SystemTime::now());
            info!(node = %request.node_id, "node disqualified on audit update");
        }

        let now = SystemTime::now();
        if request.is_up {
            reputation.uptime_success_count += 1;
            reputation.last_contact_success = Some(now);
        } else {
            reputation.last_contact_failure = Some(now);
        }

        Ok(reputation.clone())
    }
}
