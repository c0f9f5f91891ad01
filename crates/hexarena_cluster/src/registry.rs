use std::sync::Arc;
use std::time::Duration;

use hexarena_runtime::{ExitReason, RuntimeDeps, SessionHandle, SessionRuntime};
use hexarena_session::{Rules, Session, SessionStatus};
use hexarena_store::{SnapshotError, StoreError, SummaryStore};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::fabric::{ClaimRejected, Fabric, NodeLink};
use crate::handoff::{handoff_key, HandoffStore};
use crate::node::{ClusterEvent, NodeId};

/// Knobs for one node's placement registry.
#[derive(Clone, Debug)]
pub struct RegistrySettings {
    pub rules: Rules,
    /// Length of one round; the runtime arms its deadline from this.
    pub round_duration: Duration,
    /// Per-call budget for commands sent through session handles.
    pub command_timeout: Duration,
    /// Backoff between handoff pickup attempts during runtime boot.
    pub pickup_retry: Duration,
    /// Total handoff pickup window before falling back to the durable store.
    pub pickup_total: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            rules: Rules::default(),
            round_duration: Duration::from_secs(30),
            command_timeout: Duration::from_secs(5),
            pickup_retry: Duration::from_millis(25),
            pickup_total: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("session is not alive")]
    SessionNotAlive,
    #[error("join code {0:?} is already taken")]
    DuplicateJoinCode(String),
    #[error("session {0} already has a live placement")]
    DuplicateSession(Uuid),
    #[error("no cluster members available for placement")]
    NoMembers,
    #[error("session is being placed or migrated, retry shortly")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Where the state of a booting runtime comes from.
pub(crate) enum BootSource {
    /// A brand-new session from the creation path.
    Fresh(Session),
    /// A caller-provided snapshot, already migrated. Handoff and durable
    /// state still take precedence when present.
    Snapshot(Session),
    /// Nothing but a session id; used for crash restarts and takeovers.
    Recover(Uuid),
}

impl BootSource {
    fn session_id(&self) -> Uuid {
        match self {
            BootSource::Fresh(s) | BootSource::Snapshot(s) => s.id,
            BootSource::Recover(id) => *id,
        }
    }
}

/// A placement request dispatched to the owning node's worker queue.
pub(crate) struct SpawnRequest {
    pub(crate) boot: BootSource,
    pub(crate) replace_owner: Option<NodeId>,
    pub(crate) reply: oneshot::Sender<Result<SessionHandle, ClusterError>>,
}

/// One node's view of the cluster-wide placement registry, plus the
/// supervisor that keeps at most one live runtime per session.
///
/// Restart policy is permanent: a crashed runtime is restarted from its last
/// durable boundary. Concluded, stopped, and stashed runtimes are not
/// restarted; stashed placements stay in the registry so the next ring owner
/// can take them over when this node's departure is announced.
#[derive(Clone)]
pub struct PlacementRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    node: NodeId,
    fabric: Fabric,
    store: SummaryStore,
    handoff: HandoffStore,
    settings: RegistrySettings,
}

impl PlacementRegistry {
    /// Joins the fabric as a new node and starts the placement worker and the
    /// membership watcher.
    pub fn join(fabric: Fabric, store: SummaryStore, settings: RegistrySettings) -> Self {
        let node = NodeId::random();
        let handoff = HandoffStore::new(node, fabric.clone());

        let (spawn_tx, spawn_rx) = flume::unbounded();

        fabric.join(
            node,
            NodeLink {
                spawn: spawn_tx,
                handoff: handoff.replica(),
            },
        );
        handoff.pull();

        let registry = Self {
            inner: Arc::new(RegistryInner {
                node,
                fabric: fabric.clone(),
                store,
                handoff,
                settings,
            }),
        };

        tokio::spawn(spawn_worker(registry.clone(), spawn_rx));
        tokio::spawn(membership_worker(registry.clone(), fabric.subscribe()));

        info!(%node, "placement registry joined the cluster");

        registry
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node
    }

    pub fn handoff(&self) -> &HandoffStore {
        &self.inner.handoff
    }

    /// Places a newly created session on its ring owner and starts its
    /// runtime. The join code must be unique cluster-wide.
    pub async fn start_session(&self, session: Session) -> Result<SessionHandle, ClusterError> {
        let owner = self
            .inner
            .fabric
            .owner_of(session.id)
            .ok_or(ClusterError::NoMembers)?;

        self.dispatch(owner, BootSource::Fresh(session), None).await
    }

    /// Resumes a session from a snapshot. Idempotent: an existing live
    /// placement wins and no second runtime is started.
    pub async fn continue_session(&self, snapshot: Session) -> Result<SessionHandle, ClusterError> {
        let session_id = snapshot.id;

        if let Some(placement) = self.inner.fabric.placement(session_id) {
            if self.inner.fabric.is_member(placement.owner) {
                return placement.handle.ok_or(ClusterError::Unavailable);
            }

            // The recorded owner is gone; re-place on the current ring owner.
            let owner = self
                .inner
                .fabric
                .owner_of(session_id)
                .ok_or(ClusterError::NoMembers)?;

            return self
                .dispatch(owner, BootSource::Snapshot(snapshot), Some(placement.owner))
                .await;
        }

        let owner = self
            .inner
            .fabric
            .owner_of(session_id)
            .ok_or(ClusterError::NoMembers)?;

        self.dispatch(owner, BootSource::Snapshot(snapshot), None)
            .await
    }

    pub fn lookup_by_id(&self, session_id: Uuid) -> Result<SessionHandle, ClusterError> {
        match self.inner.fabric.placement(session_id) {
            None => Err(ClusterError::SessionNotAlive),
            Some(placement) => placement.handle.ok_or(ClusterError::Unavailable),
        }
    }

    pub fn lookup_by_join_code(&self, join_code: &str) -> Result<SessionHandle, ClusterError> {
        match self.inner.fabric.by_join_code(join_code) {
            None => Err(ClusterError::SessionNotAlive),
            Some((_, placement)) => placement.handle.ok_or(ClusterError::Unavailable),
        }
    }

    /// Stops a session's runtime without restart. The request is handled
    /// asynchronously by the runtime, which replies before it exits, so a
    /// runtime can safely request its own shutdown.
    pub async fn shutdown_session(&self, session_id: Uuid) -> Result<(), ClusterError> {
        let handle = self.lookup_by_id(session_id)?;

        // An already-exited runtime is as shut down as it gets.
        let _ = handle.stop().await;

        Ok(())
    }

    /// Restarts every active session recorded in the durable store that has
    /// no live placement. Idempotent; returns how many were resumed.
    pub async fn resume_all_active(&self) -> Result<usize, ClusterError> {
        let mut resumed = 0;

        for summary in self.inner.store.all_active().await? {
            if self.inner.fabric.placement(summary.session_id).is_some() {
                continue;
            }

            let session = match summary.decode_snapshot() {
                Ok(session) => session,
                Err(e) => {
                    // Surfaced to the operator; one broken snapshot must not
                    // block the rest of the sweep.
                    error!(session_id = %summary.session_id, error = %e, "cannot resume session");
                    continue;
                }
            };

            match self.continue_session(session).await {
                Ok(_) => resumed += 1,
                Err(ClusterError::Unavailable) => {}
                Err(e) => {
                    error!(session_id = %summary.session_id, error = %e, "failed to resume session")
                }
            }
        }

        Ok(resumed)
    }

    /// Graceful node shutdown: stash every local active runtime, block until
    /// the stash reaches a peer (or the grace window lapses), then announce
    /// departure so survivors take the sessions over.
    pub async fn shutdown(&self, stash_grace: Duration) {
        let local = self.inner.fabric.owned_by(self.inner.node);
        info!(node = %self.inner.node, sessions = local.len(), "stashing local sessions for handoff");

        for session_id in local {
            if let Some(handle) = self
                .inner
                .fabric
                .placement(session_id)
                .and_then(|p| p.handle)
            {
                if let Err(e) = handle.stash().await {
                    warn!(%session_id, error = %e, "could not stash session");
                }
            }
        }

        self.inner.handoff.flush(stash_grace).await;
        self.inner.fabric.leave(self.inner.node);
    }

    async fn dispatch(
        &self,
        owner: NodeId,
        boot: BootSource,
        replace_owner: Option<NodeId>,
    ) -> Result<SessionHandle, ClusterError> {
        if owner == self.inner.node {
            return self.spawn_local(boot, replace_owner).await;
        }

        let link = self
            .inner
            .fabric
            .spawn_link(owner)
            .ok_or(ClusterError::Unavailable)?;

        let (reply, rx) = oneshot::channel();

        link.send_async(SpawnRequest {
            boot,
            replace_owner,
            reply,
        })
        .await
        .map_err(|_| ClusterError::Unavailable)?;

        rx.await.map_err(|_| ClusterError::Unavailable)?
    }

    /// Boots and starts one runtime on this node, claiming its placement
    /// first so at most one runtime per session exists cluster-wide.
    fn spawn_local(
        &self,
        boot: BootSource,
        replace_owner: Option<NodeId>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<SessionHandle, ClusterError>> + Send + '_>,
    > {
        Box::pin(self.spawn_local_inner(boot, replace_owner))
    }

    async fn spawn_local_inner(
        &self,
        boot: BootSource,
        replace_owner: Option<NodeId>,
    ) -> Result<SessionHandle, ClusterError> {
        let fresh = matches!(boot, BootSource::Fresh(_));
        let session = self.boot_session(boot).await?;
        let session_id = session.id;

        if session.status == SessionStatus::Concluded {
            return Err(ClusterError::SessionNotAlive);
        }

        if let Err(rejection) =
            self.inner
                .fabric
                .claim(session_id, &session.join_code, self.inner.node, replace_owner)
        {
            return match rejection {
                ClaimRejected::JoinCodeTaken => {
                    Err(ClusterError::DuplicateJoinCode(session.join_code))
                }
                ClaimRejected::Placed(_) if fresh => {
                    Err(ClusterError::DuplicateSession(session_id))
                }
                // Someone else already resumed it; that is the one runtime.
                ClaimRejected::Placed(Some(handle)) => Ok(handle),
                ClaimRejected::Placed(None) => Err(ClusterError::Unavailable),
            };
        }

        let deps = RuntimeDeps {
            store: self.inner.store.clone(),
            stash: Some(Arc::new(self.inner.handoff.clone())),
            rules: self.inner.settings.rules,
            round_duration: self.inner.settings.round_duration,
            command_timeout: self.inner.settings.command_timeout,
        };

        let (handle, task) = SessionRuntime::spawn(session, deps);

        self.inner.fabric.fill(session_id, handle.clone());
        tokio::spawn(watch(self.clone(), session_id, task));

        debug!(%session_id, node = %self.inner.node, "session placed");

        Ok(handle)
    }

    /// Resolves the boot state: handoff entry first (consumed on read, with a
    /// bounded retry window for replication lag), then the durable snapshot,
    /// then whatever the caller provided.
    async fn boot_session(&self, boot: BootSource) -> Result<Session, ClusterError> {
        let session_id = boot.session_id();

        let provided = match boot {
            BootSource::Fresh(session) => return Ok(session),
            BootSource::Snapshot(session) => Some(session),
            BootSource::Recover(_) => None,
        };

        let picked = self
            .inner
            .handoff
            .pickup(
                &handoff_key(session_id),
                self.inner.settings.pickup_retry,
                self.inner.settings.pickup_total,
            )
            .await;

        if let Some(value) = picked {
            return Ok(hexarena_store::decode(value)?);
        }

        if let Some(summary) = self.inner.store.by_id(session_id).await? {
            return Ok(summary.decode_snapshot()?);
        }

        provided.ok_or(ClusterError::SessionNotAlive)
    }
}

async fn spawn_worker(registry: PlacementRegistry, requests: flume::Receiver<SpawnRequest>) {
    while let Ok(request) = requests.recv_async().await {
        let result = registry
            .spawn_local(request.boot, request.replace_owner)
            .await;
        let _ = request.reply.send(result);
    }
}

/// Supervises one runtime task to its end and applies the restart policy.
async fn watch(registry: PlacementRegistry, session_id: Uuid, task: JoinHandle<ExitReason>) {
    let inner = &registry.inner;

    match task.await {
        Ok(ExitReason::Concluded) => {
            inner.fabric.release(session_id);
            inner.handoff.delete(&handoff_key(session_id));
            debug!(%session_id, "concluded session removed from registry");
        }
        Ok(ExitReason::Stopped) => {
            inner.fabric.release(session_id);
        }
        Ok(ExitReason::Stashed) => {
            // The placement record stays so the next owner can find and
            // take over the session once this node's departure is announced.
        }
        Err(e) => {
            error!(%session_id, error = %e, "session runtime failed, restarting");

            if let Err(e) = registry
                .spawn_local(BootSource::Recover(session_id), Some(inner.node))
                .await
            {
                error!(%session_id, error = %e, "could not restart session");
                inner.fabric.release(session_id);
            }
        }
    }
}

/// Reacts to membership changes: when a node disappears, its sessions are
/// restarted on their new ring owners.
async fn membership_worker(
    registry: PlacementRegistry,
    mut events: tokio::sync::broadcast::Receiver<ClusterEvent>,
) {
    while let Ok(event) = events.recv().await {
        let ClusterEvent::NodeDown(dead) = event else {
            continue;
        };

        for session_id in registry.inner.fabric.owned_by(dead) {
            if registry.inner.fabric.owner_of(session_id) != Some(registry.inner.node) {
                continue;
            }

            match registry
                .spawn_local(BootSource::Recover(session_id), Some(dead))
                .await
            {
                Ok(_) => info!(%session_id, from = %dead, "took over session"),
                Err(e) => error!(%session_id, error = %e, "failed to take over session"),
            }
        }
    }
}
