//! Leader election: picks the primary for a given view.
//!
//! Only round-robin is implemented, but the election method is read
//! from configuration and dispatched by name, leaving room for other
//! strategies without touching call sites.

use crate::bft::communication::NodeId;
use crate::bft::config::Config;
use crate::bft::error::*;
use crate::bft::ordering::ViewNo;

/// Picks the primary of a view, deterministically and identically
/// across every replica.
pub struct LeaderElection {
    method: String,
    node_num: i64,
}

impl LeaderElection {
    pub fn new(config: &Config) -> Self {
        LeaderElection {
            method: config.election_method.clone(),
            node_num: config.n(),
        }
    }

    /// Returns the primary of `view`, or an error if the configured
    /// election method is unknown.
    pub fn leader(&self, view: ViewNo) -> Result<NodeId> {
        match self.method.as_str() {
            "round_robin" => Ok(self.round_robin(view)),
            other => Err(format!("invalid election method: {}", other))
                .simple_msg(ErrorKind::Config, "invalid election method"),
        }
    }

    fn round_robin(&self, view: ViewNo) -> NodeId {
        let id = view.into_inner().rem_euclid(self.node_num);
        NodeId::from(id as u32)
    }
}
