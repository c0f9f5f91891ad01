use std::fmt;

use uuid::Uuid;

/// Identifies one server node in the cluster.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The first uuid segment is enough to tell nodes apart in logs.
        let full = self.0.to_string();
        f.write_str(full.split('-').next().unwrap_or(&full))
    }
}

/// Membership changes, serialized through the fabric and delivered to every
/// node's placement registry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClusterEvent {
    NodeUp(NodeId),
    NodeDown(NodeId),
}
