use hexarena_cluster::{Fabric, PlacementRegistry, RegistrySettings};
use hexarena_runtime::SessionMessage;
use hexarena_session::{Liveness, Player, PlayerStatus, Session, UserId};
use hexarena_store::{ActiveSessionRow, SummaryStore};
use hexarena_world::{Grid, HexVector, PlayerCharacter, PlayerId, World};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::CoreSettings;
use crate::error::Error;

/// One user joining a newly created session.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub user_id: UserId,
    pub display_name: String,
}

/// The game-session core of one server node.
///
/// Starting a core connects the durable store (running pending schema
/// migrations), joins the cluster fabric, and resumes every active session
/// that has no live placement yet. All public operations route through the
/// placement registry to whichever node owns the session.
pub struct HexarenaCore {
    settings: CoreSettings,
    store: SummaryStore,
    registry: PlacementRegistry,
}

impl HexarenaCore {
    pub async fn start(fabric: Fabric, settings: CoreSettings) -> anyhow::Result<Self> {
        settings.validate()?;

        let store = SummaryStore::connect(&settings.dss_url, settings.dss_pool_size).await?;

        let registry = PlacementRegistry::join(
            fabric,
            store.clone(),
            RegistrySettings {
                rules: settings.rules,
                round_duration: settings.round_duration,
                command_timeout: settings.command_timeout,
                pickup_retry: settings.handoff_pickup_retry,
                pickup_total: settings.handoff_pickup_total,
            },
        );

        let core = Self {
            settings,
            store,
            registry,
        };

        let resumed = core.resume_all_active_sessions().await?;
        info!(
            node = %core.registry.node_id(),
            cluster_query = core.settings.cluster_query,
            resumed,
            "hexarena core started"
        );

        Ok(core)
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn store(&self) -> &SummaryStore {
        &self.store
    }

    pub fn registry(&self) -> &PlacementRegistry {
        &self.registry
    }

    /// Creates a session for `users`, builds its world, and starts its
    /// runtime on the owning node. The join code must be 1 to 8 alphanumeric
    /// characters (case-sensitive) and unique cluster-wide, including against
    /// the durable history.
    pub async fn create_session(
        &self,
        join_code: &str,
        users: &[NewUser],
    ) -> Result<Session, Error> {
        validate_join_code(join_code)?;

        if self.store.by_join_code(join_code).await?.is_some() {
            return Err(hexarena_cluster::ClusterError::DuplicateJoinCode(join_code.to_owned()).into());
        }

        let session = self.build_session(join_code, users)?;
        let handle = self.registry.start_session(session).await?;

        // Read back through the runtime so the caller sees the armed
        // deadline.
        Ok(handle.session().await?)
    }

    /// Resumes a session from a snapshot, upgrading it from whatever schema
    /// version it carries. Idempotent against live placements.
    pub async fn continue_session(&self, snapshot: Value) -> Result<Session, Error> {
        let session = hexarena_store::decode(snapshot).map_err(hexarena_cluster::ClusterError::from)?;
        let handle = self.registry.continue_session(session).await?;

        Ok(handle.session().await?)
    }

    pub async fn get_session_by_id(&self, session_id: Uuid) -> Result<Session, Error> {
        Ok(self.registry.lookup_by_id(session_id)?.session().await?)
    }

    pub async fn get_session_by_join_code(&self, join_code: &str) -> Result<Session, Error> {
        Ok(self
            .registry
            .lookup_by_join_code(join_code)?
            .session()
            .await?)
    }

    pub async fn get_player_status(
        &self,
        session_id: Uuid,
        user_id: UserId,
    ) -> Result<Liveness, Error> {
        Ok(self
            .registry
            .lookup_by_id(session_id)?
            .player_status(user_id)
            .await?)
    }

    pub async fn register_move(
        &self,
        session_id: Uuid,
        user_id: UserId,
        vector: HexVector,
    ) -> Result<(), Error> {
        Ok(self
            .registry
            .lookup_by_id(session_id)?
            .register_move(user_id, vector)
            .await?)
    }

    pub async fn register_attack(
        &self,
        session_id: Uuid,
        user_id: UserId,
        target_id: PlayerId,
    ) -> Result<(), Error> {
        Ok(self
            .registry
            .lookup_by_id(session_id)?
            .register_attack(user_id, target_id)
            .await?)
    }

    /// Resolves the current round and returns the post-round session.
    /// `now_override` exists for tests; production passes `None`.
    pub async fn end_round(
        &self,
        session_id: Uuid,
        now_override: Option<OffsetDateTime>,
    ) -> Result<Session, Error> {
        Ok(self
            .registry
            .lookup_by_id(session_id)?
            .end_round(now_override)
            .await?)
    }

    /// Active sessions the user participates in, straight from the durable
    /// store.
    pub async fn active_sessions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ActiveSessionRow>, Error> {
        Ok(self.store.active_for_user(user_id).await?)
    }

    /// Restarts every active session without a live placement. Idempotent
    /// startup hook; returns how many were resumed.
    pub async fn resume_all_active_sessions(&self) -> Result<usize, Error> {
        Ok(self.registry.resume_all_active().await?)
    }

    /// Subscribes to the session's topic of round broadcasts.
    pub fn subscribe(&self, session_id: Uuid) -> Result<broadcast::Receiver<SessionMessage>, Error> {
        Ok(self.registry.lookup_by_id(session_id)?.subscribe())
    }

    /// Graceful node shutdown: stash every local active session for handoff,
    /// wait for replication within the configured grace window, and leave the
    /// cluster.
    pub async fn shutdown(&self) {
        self.registry
            .shutdown(self.settings.handoff_stash_grace)
            .await;
    }

    fn build_session(&self, join_code: &str, users: &[NewUser]) -> Result<Session, Error> {
        let grid = Grid::hexagon(self.settings.grid_radius);

        if users.is_empty() {
            return Err(Error::Internal("a session needs at least one player".to_owned()));
        }

        if users.len() > grid.len() {
            return Err(Error::Internal(format!(
                "a {}-cell board cannot seat {} players",
                grid.len(),
                users.len()
            )));
        }

        let players: Vec<Player> = users
            .iter()
            .enumerate()
            .map(|(i, user)| Player {
                id: PlayerId(i as i64 + 1),
                user_id: user.user_id,
                display_name: user.display_name.clone(),
                status: PlayerStatus::Active,
            })
            .collect();

        // Starting positions are the first free cells in grid order; world
        // generation beyond the standard board is not the core's business.
        let characters: Vec<PlayerCharacter> = players
            .iter()
            .zip(grid.iter())
            .map(|(player, (position, _))| PlayerCharacter {
                player_id: player.id,
                position,
                health: self.settings.rules.starting_health,
                action_points: self.settings.rules.starting_ap,
            })
            .collect();

        let world = World::new(grid, characters)
            .map_err(|e| Error::Internal(format!("could not build world: {e}")))?;

        Ok(Session::new(
            Uuid::new_v4(),
            join_code.to_owned(),
            players,
            world,
        ))
    }
}

fn validate_join_code(join_code: &str) -> Result<(), Error> {
    let valid = !join_code.is_empty()
        && join_code.len() <= 8
        && join_code.chars().all(|c| c.is_ascii_alphanumeric());

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidJoinCode(join_code.to_owned()))
    }
}
