use std::time::Duration;

use hexarena_cluster::{ClusterError, Fabric, PlacementRegistry, RegistrySettings};
use hexarena_session::{Player, PlayerStatus, Session, SessionStatus, UserId};
use hexarena_store::SummaryStore;
use hexarena_world::{Coord, Grid, PlayerCharacter, PlayerId, World};
use pretty_assertions::assert_eq;
use uuid::Uuid;

fn sample_session(join_code: &str, healths: &[i64]) -> Session {
    let players: Vec<Player> = healths
        .iter()
        .enumerate()
        .map(|(i, _)| Player {
            id: PlayerId(i as i64 + 1),
            user_id: UserId((i as i64 + 1) * 100),
            display_name: format!("player-{i}"),
            status: PlayerStatus::Active,
        })
        .collect();

    let world = World::new(
        Grid::hexagon(2),
        healths.iter().enumerate().map(|(i, &health)| PlayerCharacter {
            player_id: PlayerId(i as i64 + 1),
            position: Coord::new(0, 0),
            health,
            action_points: 3,
        }),
    )
    .unwrap();

    Session::new(Uuid::new_v4(), join_code.to_owned(), players, world)
}

async fn memory_store() -> SummaryStore {
    SummaryStore::connect("sqlite::memory:", 1).await.unwrap()
}

fn settings() -> RegistrySettings {
    RegistrySettings {
        round_duration: Duration::from_secs(600),
        command_timeout: Duration::from_secs(5),
        pickup_retry: Duration::from_millis(10),
        pickup_total: Duration::from_millis(200),
        ..RegistrySettings::default()
    }
}

#[tokio::test]
async fn start_session_and_look_it_up_both_ways() {
    let fabric = Fabric::new();
    let registry = PlacementRegistry::join(fabric, memory_store().await, settings());

    let session = sample_session("LOOK", &[10, 10]);
    let session_id = session.id;

    let handle = registry.start_session(session).await.unwrap();
    assert_eq!(handle.session_id(), session_id);

    let by_id = registry.lookup_by_id(session_id).unwrap();
    assert_eq!(by_id.session().await.unwrap().join_code, "LOOK");

    let by_code = registry.lookup_by_join_code("LOOK").unwrap();
    assert_eq!(by_code.session_id(), session_id);

    assert!(matches!(
        registry.lookup_by_id(Uuid::new_v4()),
        Err(ClusterError::SessionNotAlive)
    ));
}

#[tokio::test]
async fn duplicate_join_codes_are_a_conflict() {
    let fabric = Fabric::new();
    let registry = PlacementRegistry::join(fabric, memory_store().await, settings());

    registry
        .start_session(sample_session("SAME", &[10, 10]))
        .await
        .unwrap();

    let err = registry
        .start_session(sample_session("SAME", &[10, 10]))
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::DuplicateJoinCode(code) if code == "SAME"));
}

// A session whose game is over exits its runtime and must not come back.
#[tokio::test]
async fn concluded_sessions_terminate_without_restart() {
    let fabric = Fabric::new();
    let registry = PlacementRegistry::join(fabric, memory_store().await, settings());

    let handle = registry
        .start_session(sample_session("OVER", &[1, 1]))
        .await
        .unwrap();
    let session_id = handle.session_id();

    handle
        .register_attack(UserId(100), PlayerId(2))
        .await
        .unwrap();
    let after = handle.end_round(None).await.unwrap();
    assert_eq!(after.status, SessionStatus::Concluded);

    // The supervisor unregisters the placement instead of restarting.
    for _ in 0..100 {
        if matches!(
            registry.lookup_by_id(session_id),
            Err(ClusterError::SessionNotAlive)
        ) {
            return;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("concluded session still registered");
}

// Rolling restart: a session survives its node's graceful shutdown with
// round, world, and event log intact, picked up by the surviving node.
#[tokio::test]
async fn graceful_shutdown_hands_the_session_to_the_survivor() {
    let fabric = Fabric::new();
    let store = memory_store().await;

    let n1 = PlacementRegistry::join(fabric.clone(), store.clone(), settings());
    let n2 = PlacementRegistry::join(fabric.clone(), store.clone(), settings());

    let handle = n1
        .start_session(sample_session("ROLL", &[10, 10]))
        .await
        .unwrap();
    let session_id = handle.session_id();

    handle.end_round(None).await.unwrap();
    let before = handle.session().await.unwrap();
    assert_eq!(before.round, 2);

    let owner = fabric.owner_of(session_id).unwrap();
    let (dying, surviving) = if owner == n1.node_id() {
        (n1, n2)
    } else {
        (n2, n1)
    };

    dying.shutdown(Duration::from_secs(1)).await;

    // The survivor takes the session over once the departure is announced.
    for _ in 0..200 {
        if let Ok(handle) = surviving.lookup_by_id(session_id) {
            if let Ok(after) = handle.session().await {
                assert_eq!(after.round, before.round);
                assert_eq!(after.world, before.world);
                assert_eq!(after.events_log, before.events_log);
                return;
            }
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("session never came back on the surviving node");
}

#[tokio::test]
async fn resume_all_active_is_idempotent() {
    let fabric = Fabric::new();
    let store = memory_store().await;

    let active_a = sample_session("RESA", &[10, 10]);
    let active_b = sample_session("RESB", &[10, 10]);
    let mut concluded = sample_session("RESC", &[10, 10]);
    concluded.status = SessionStatus::Concluded;

    store.upsert(&active_a).await.unwrap();
    store.upsert(&active_b).await.unwrap();
    store.upsert(&concluded).await.unwrap();

    let registry = PlacementRegistry::join(fabric, store, settings());

    assert_eq!(registry.resume_all_active().await.unwrap(), 2);
    assert!(registry.lookup_by_id(active_a.id).is_ok());
    assert!(registry.lookup_by_id(active_b.id).is_ok());
    assert!(matches!(
        registry.lookup_by_id(concluded.id),
        Err(ClusterError::SessionNotAlive)
    ));

    // Already placed: a second sweep starts nothing new.
    assert_eq!(registry.resume_all_active().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_session_stops_the_runtime_for_good() {
    let fabric = Fabric::new();
    let registry = PlacementRegistry::join(fabric, memory_store().await, settings());

    let handle = registry
        .start_session(sample_session("STOP", &[10, 10]))
        .await
        .unwrap();
    let session_id = handle.session_id();

    registry.shutdown_session(session_id).await.unwrap();

    for _ in 0..100 {
        if matches!(
            registry.lookup_by_id(session_id),
            Err(ClusterError::SessionNotAlive)
        ) {
            return;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("stopped session still registered");
}
