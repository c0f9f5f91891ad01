//! Helpers for tests that need a running core, or several of them on one
//! fabric. Kept out of `#[cfg(test)]` so downstream crates can drive the same
//! scenarios.

use std::time::Duration;

use hexarena_cluster::Fabric;
use hexarena_session::{Player, PlayerStatus, Session, UserId};
use hexarena_world::{Coord, Grid, PlayerCharacter, PlayerId, World};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::{CoreSettings, HexarenaCore, NewUser};

/// A cluster of cores sharing one fabric and one durable database, the way a
/// real multi-node deployment shares its discovery mechanism and its
/// database server.
pub struct ScenarioCluster {
    pub fabric: Fabric,
    pub nodes: Vec<HexarenaCore>,
}

/// Installs a compact env-filtered logger. Safe to call repeatedly; only the
/// first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl ScenarioCluster {
    pub async fn new(node_count: usize, dss_url: &str) -> Self {
        init_tracing();

        let fabric = Fabric::new();
        let mut nodes = Vec::with_capacity(node_count);

        for _ in 0..node_count {
            nodes.push(
                HexarenaCore::start(fabric.clone(), test_settings(dss_url))
                    .await
                    .expect("core failed to start"),
            );
        }

        Self { fabric, nodes }
    }

    pub fn node(&self, index: usize) -> &HexarenaCore {
        &self.nodes[index]
    }
}

/// Settings tuned for tests: long rounds so deadline timers stay out of the
/// way, and a short handoff pickup window.
pub fn test_settings(dss_url: &str) -> CoreSettings {
    CoreSettings {
        round_duration: Duration::from_secs(600),
        command_timeout: Duration::from_secs(5),
        handoff_stash_grace: Duration::from_secs(1),
        handoff_pickup_retry: Duration::from_millis(10),
        handoff_pickup_total: Duration::from_millis(200),
        dss_url: dss_url.to_owned(),
        dss_pool_size: 2,
        ..CoreSettings::default()
    }
}

pub fn random_join_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// `count` users named after their ids, for the creation path.
pub fn some_users(count: i64) -> Vec<NewUser> {
    (1..=count)
        .map(|i| NewUser {
            user_id: UserId(i * 100),
            display_name: format!("user-{i}"),
        })
        .collect()
}

/// A session with a hand-placed board, for scenarios that need specific
/// starting positions. Player `n` belongs to user `n * 100`; everyone starts
/// with 10 health and 5 action points.
pub fn session_on_board(join_code: &str, pcs: &[(i64, Coord)]) -> Session {
    let players: Vec<Player> = pcs
        .iter()
        .map(|&(id, _)| Player {
            id: PlayerId(id),
            user_id: UserId(id * 100),
            display_name: format!("player-{id}"),
            status: PlayerStatus::Active,
        })
        .collect();

    let world = World::new(
        Grid::hexagon(3),
        pcs.iter().map(|&(id, position)| PlayerCharacter {
            player_id: PlayerId(id),
            position,
            health: 10,
            action_points: 5,
        }),
    )
    .expect("test board must be valid");

    Session::new(Uuid::new_v4(), join_code.to_owned(), players, world)
}
