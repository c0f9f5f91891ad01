use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hexarena_runtime::SessionHandle;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::handoff::HandoffReplica;
use crate::node::{ClusterEvent, NodeId};
use crate::registry::SpawnRequest;
use crate::ring;

/// One session's entry in the cluster-wide placement registry.
#[derive(Clone, Debug)]
pub(crate) struct Placement {
    pub(crate) join_code: String,
    pub(crate) owner: NodeId,
    /// `None` while the owning node is still booting the runtime.
    pub(crate) handle: Option<SessionHandle>,
}

/// How a node is reached by the rest of the cluster: a queue for placement
/// requests and its handoff replica for state replication.
pub(crate) struct NodeLink {
    pub(crate) spawn: flume::Sender<SpawnRequest>,
    pub(crate) handoff: HandoffReplica,
}

/// Why a placement claim was refused.
pub(crate) enum ClaimRejected {
    /// A placement already exists. Carries its handle once it is past boot.
    Placed(Option<SessionHandle>),
    JoinCodeTaken,
}

#[derive(Default)]
struct RegistryState {
    placements: HashMap<Uuid, Placement>,
    join_codes: HashMap<String, Uuid>,
}

/// The replicated state every node of one cluster shares: membership, the
/// placement registry, and monotonic stamps for handoff entries.
///
/// In production the equivalent state rides on the external cluster
/// transport; this in-process realization carries its contract (and is what
/// multi-node tests instantiate).
#[derive(Clone)]
pub struct Fabric(Arc<FabricInner>);

struct FabricInner {
    stamp: AtomicU64,
    events: broadcast::Sender<ClusterEvent>,
    members: RwLock<BTreeMap<NodeId, NodeLink>>,
    registry: RwLock<RegistryState>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);

        Self(Arc::new(FabricInner {
            stamp: AtomicU64::new(1),
            events,
            members: RwLock::new(BTreeMap::new()),
            registry: RwLock::new(RegistryState::default()),
        }))
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.0.members.read().keys().copied().collect()
    }

    pub fn is_member(&self, node: NodeId) -> bool {
        self.0.members.read().contains_key(&node)
    }

    /// The ring owner for `session_id` under current membership.
    pub fn owner_of(&self, session_id: Uuid) -> Option<NodeId> {
        ring::owner(self.0.members.read().keys(), session_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.0.events.subscribe()
    }

    pub(crate) fn join(&self, node: NodeId, link: NodeLink) {
        self.0.members.write().insert(node, link);
        let _ = self.0.events.send(ClusterEvent::NodeUp(node));
        debug!(%node, "node joined the fabric");
    }

    pub(crate) fn leave(&self, node: NodeId) {
        if self.0.members.write().remove(&node).is_some() {
            let _ = self.0.events.send(ClusterEvent::NodeDown(node));
            debug!(%node, "node left the fabric");
        }
    }

    pub(crate) fn next_stamp(&self) -> u64 {
        self.0.stamp.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn spawn_link(&self, node: NodeId) -> Option<flume::Sender<SpawnRequest>> {
        self.0
            .members
            .read()
            .get(&node)
            .map(|link| link.spawn.clone())
    }

    /// Handoff replicas of every member except `exclude`.
    pub(crate) fn peer_replicas(&self, exclude: NodeId) -> Vec<HandoffReplica> {
        self.0
            .members
            .read()
            .iter()
            .filter(|(&node, _)| node != exclude)
            .map(|(_, link)| link.handoff.clone())
            .collect()
    }

    /// Atomically claims the placement of `session_id` for `owner`.
    ///
    /// An existing placement blocks the claim unless its owner equals
    /// `replace_owner`, which is how crash restarts and node takeovers evict
    /// the stale record.
    pub(crate) fn claim(
        &self,
        session_id: Uuid,
        join_code: &str,
        owner: NodeId,
        replace_owner: Option<NodeId>,
    ) -> Result<(), ClaimRejected> {
        let mut registry = self.0.registry.write();

        if let Some(existing) = registry.placements.get(&session_id) {
            if Some(existing.owner) != replace_owner {
                return Err(ClaimRejected::Placed(existing.handle.clone()));
            }
        }

        if let Some(&taken_by) = registry.join_codes.get(join_code) {
            if taken_by != session_id {
                return Err(ClaimRejected::JoinCodeTaken);
            }
        }

        registry.join_codes.insert(join_code.to_owned(), session_id);
        registry.placements.insert(
            session_id,
            Placement {
                join_code: join_code.to_owned(),
                owner,
                handle: None,
            },
        );

        Ok(())
    }

    /// Completes a claim once the runtime is up.
    pub(crate) fn fill(&self, session_id: Uuid, handle: SessionHandle) {
        if let Some(placement) = self.0.registry.write().placements.get_mut(&session_id) {
            placement.handle = Some(handle);
        }
    }

    /// Drops a placement and its join-code mapping entirely.
    pub(crate) fn release(&self, session_id: Uuid) {
        let mut registry = self.0.registry.write();

        if let Some(placement) = registry.placements.remove(&session_id) {
            registry.join_codes.remove(&placement.join_code);
        }
    }

    pub(crate) fn placement(&self, session_id: Uuid) -> Option<Placement> {
        self.0.registry.read().placements.get(&session_id).cloned()
    }

    pub(crate) fn by_join_code(&self, join_code: &str) -> Option<(Uuid, Placement)> {
        let registry = self.0.registry.read();
        let session_id = *registry.join_codes.get(join_code)?;

        registry
            .placements
            .get(&session_id)
            .cloned()
            .map(|placement| (session_id, placement))
    }

    /// Sessions currently recorded as owned by `node`.
    pub(crate) fn owned_by(&self, node: NodeId) -> Vec<Uuid> {
        self.0
            .registry
            .read()
            .placements
            .iter()
            .filter(|(_, p)| p.owner == node)
            .map(|(&id, _)| id)
            .collect()
    }
}
