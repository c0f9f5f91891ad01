use std::time::Duration;

use hexarena_session::UserId;
use pretty_assertions::assert_eq;

use crate::testing::{some_users, ScenarioCluster};
use crate::HexarenaCore;

// Rolling restart across two nodes: the session migrates with its round,
// world, and event log intact, within the handoff pickup window.
#[tokio::test]
async fn rolling_restart_migrates_in_flight_sessions() {
    let (_dir, url) = super::temp_db();
    let cluster = ScenarioCluster::new(2, &url).await;

    let creator = cluster.node(0);
    let session = creator.create_session("ROLLME", &some_users(3)).await.unwrap();

    // Put some history on the session so there is state worth preserving.
    creator
        .register_move(session.id, UserId(100), hexarena_world::HexVector::new(1, 0))
        .await
        .unwrap();
    let before = creator.end_round(session.id, None).await.unwrap();
    assert_eq!(before.round, 2);

    let owner = cluster.fabric.owner_of(session.id).unwrap();
    let mut nodes = cluster.nodes;
    let dying_index = nodes
        .iter()
        .position(|n| n.registry().node_id() == owner)
        .expect("some node owns the session");
    let dying = nodes.remove(dying_index);
    let surviving = &nodes[0];

    dying.shutdown().await;

    for _ in 0..200 {
        if let Ok(after) = surviving.get_session_by_id(session.id).await {
            assert_eq!(after.round, before.round);
            assert_eq!(after.world, before.world);
            assert_eq!(after.events_log, before.events_log);
            return;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("session never reappeared on the surviving node");
}

// A lone node shutting down has nobody to replicate to; the durable store
// still carries the session for the next cold start.
#[tokio::test]
async fn lone_node_shutdown_falls_back_to_durable_state() {
    let (_dir, url) = super::temp_db();

    let session_id = {
        let cluster = ScenarioCluster::new(1, &url).await;
        let core = cluster.node(0);

        let session = core.create_session("ALONE", &some_users(2)).await.unwrap();
        core.shutdown().await;

        session.id
    };

    let core = HexarenaCore::start(
        hexarena_cluster::Fabric::new(),
        crate::testing::test_settings(&url),
    )
    .await
    .unwrap();

    let recovered = core.get_session_by_id(session_id).await.unwrap();
    assert_eq!(recovered.round, 1);
}
