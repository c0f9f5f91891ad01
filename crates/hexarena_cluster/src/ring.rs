use std::hash::{DefaultHasher, Hash, Hasher};

use uuid::Uuid;

use crate::node::NodeId;

/// Picks the owning node for a session by rendezvous (highest-random-weight)
/// hashing: every node scores the session and the highest score wins.
///
/// Removing a node only moves the sessions that node owned; everything else
/// keeps its placement, which is what keeps membership changes cheap.
pub(crate) fn owner<'a>(
    members: impl IntoIterator<Item = &'a NodeId>,
    session_id: Uuid,
) -> Option<NodeId> {
    members
        .into_iter()
        .map(|&node| (score(node, session_id), node))
        .max()
        .map(|(_, node)| node)
}

fn score(node: NodeId, session_id: Uuid) -> u64 {
    let mut hasher = DefaultHasher::new();
    node.as_uuid().hash(&mut hasher);
    session_id.hash(&mut hasher);
    hasher.finish()
}
