use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hexarena_session::{resolve_round, Rules, Session, SessionStatus, SCHEMA_VERSION};
use hexarena_store::SummaryStore;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::SessionCommand;
use crate::handle::{SessionHandle, SessionMessage};

/// Where a runtime publishes its state when asked to stash for handoff.
/// Implemented by the cluster's handoff store; tests substitute their own.
#[async_trait]
pub trait StashSink: Send + Sync + 'static {
    async fn stash(&self, session: &Session);
}

/// Everything a session runtime needs besides the session itself.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub store: SummaryStore,
    pub stash: Option<Arc<dyn StashSink>>,
    pub rules: Rules,
    pub round_duration: Duration,
    pub command_timeout: Duration,
}

/// Why a runtime's task finished. Panics are not represented here; they
/// surface as join errors and are the restartable failure case.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExitReason {
    /// The game is over. Supervisors must not restart.
    Concluded,
    /// State was published for handoff during node shutdown. No restart on
    /// this node; the next owner picks the session up.
    Stashed,
    /// Explicitly stopped without stashing. No restart.
    Stopped,
}

/// Spawner for the per-session actor task.
///
/// The task is the single writer of its session: every mutation flows through
/// the command queue, and the round-deadline timer lives in the same loop, so
/// there is no intra-session parallelism to reason about.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Spawns the runtime for an already-booted session (snapshot migration
    /// is the booter's job) and returns its handle and task.
    pub fn spawn(mut session: Session, deps: RuntimeDeps) -> (SessionHandle, JoinHandle<ExitReason>) {
        debug_assert_eq!(session.version, SCHEMA_VERSION, "spawned un-migrated session");

        session.ensure_deadline(OffsetDateTime::now_utc() + deps.round_duration);

        let (commands_tx, commands_rx) = flume::bounded(64);
        let (events_tx, _) = broadcast::channel(64);

        let handle = SessionHandle::new(
            session.id,
            session.join_code.clone(),
            commands_tx,
            events_tx.clone(),
            deps.command_timeout,
        );

        let task = tokio::spawn(run(session, commands_rx, events_tx, deps));

        (handle, task)
    }
}

async fn run(
    mut session: Session,
    commands: flume::Receiver<SessionCommand>,
    events: broadcast::Sender<SessionMessage>,
    deps: RuntimeDeps,
) -> ExitReason {
    debug!(session_id = %session.id, round = session.round, "session runtime started");

    // The creation path and every migration-upgrading boot leave fresher
    // state in memory than on disk, so commit once up front.
    persist(&deps.store, &session).await;

    loop {
        if session.status == SessionStatus::Concluded {
            return ExitReason::Concluded;
        }

        let deadline = session
            .round_end_time
            .expect("active session has an armed round deadline");

        // Re-armed on every iteration from the wall-clock deadline, which
        // also cancels timers made stale by a manual round end.
        let sleep_for = std::time::Duration::try_from(deadline - OffsetDateTime::now_utc())
            .unwrap_or(Duration::ZERO);

        tokio::select! {
            command = commands.recv_async() => match command {
                Err(_) => return ExitReason::Stopped,
                Ok(SessionCommand::Get { reply }) => {
                    let _ = reply.send(session.clone());
                }
                Ok(SessionCommand::RegisterMove { user_id, vector, reply }) => {
                    let result = session.register_move(
                        user_id,
                        vector,
                        &deps.rules,
                        OffsetDateTime::now_utc(),
                    );
                    let _ = reply.send(result);
                }
                Ok(SessionCommand::RegisterAttack { user_id, target_id, reply }) => {
                    let result = session.register_attack(
                        user_id,
                        target_id,
                        &deps.rules,
                        OffsetDateTime::now_utc(),
                    );
                    let _ = reply.send(result);
                }
                Ok(SessionCommand::EndRound { now, reply }) => {
                    let now = now.unwrap_or_else(OffsetDateTime::now_utc);
                    session = advance(session, now, &deps, &events).await;
                    let _ = reply.send(session.clone());
                }
                Ok(SessionCommand::PlayerStatus { user_id, reply }) => {
                    let _ = reply.send(session.liveness(user_id));
                }
                Ok(SessionCommand::Stash { reply }) => {
                    if session.status == SessionStatus::Active {
                        if let Some(sink) = &deps.stash {
                            sink.stash(&session).await;
                        }
                    }

                    let _ = reply.send(());
                    debug!(session_id = %session.id, "session stashed for handoff");
                    return ExitReason::Stashed;
                }
                Ok(SessionCommand::Stop { reply }) => {
                    let _ = reply.send(());
                    return ExitReason::Stopped;
                }
            },
            _ = tokio::time::sleep(sleep_for) => {
                session = advance(session, OffsetDateTime::now_utc(), &deps, &events).await;
            }
        }
    }
}

/// Resolves the current round, commits it durably, and broadcasts. The
/// durable write happens before any caller sees the new round, so an
/// unexpected crash loses at most the rounds since the last boundary, which
/// is at most one.
async fn advance(
    session: Session,
    now: OffsetDateTime,
    deps: &RuntimeDeps,
    events: &broadcast::Sender<SessionMessage>,
) -> Session {
    let session = resolve_round(session, now + deps.round_duration, &deps.rules);

    persist(&deps.store, &session).await;

    let snapshot = Arc::new(session.clone());
    let _ = events.send(SessionMessage::RoundAdvanced(snapshot.clone()));

    if session.status == SessionStatus::Concluded {
        let _ = events.send(SessionMessage::Concluded(snapshot));
        debug!(session_id = %session.id, round = session.round, "session concluded");
    }

    session
}

async fn persist(store: &SummaryStore, session: &Session) {
    if let Err(e) = store.upsert(session).await {
        // In-memory state stays authoritative; the write is retried at the
        // next round boundary.
        warn!(
            session_id = %session.id,
            error = %e,
            "durable write failed, retrying at next boundary"
        );
    }
}

#[cfg(test)]
mod tests {
    use hexarena_session::{ActionError, Liveness, Player, PlayerStatus, UserId};
    use hexarena_world::{Coord, Grid, HexVector, PlayerCharacter, PlayerId, World};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::handle::RuntimeError;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Session>>);

    #[async_trait]
    impl StashSink for RecordingSink {
        async fn stash(&self, session: &Session) {
            self.0.lock().push(session.clone());
        }
    }

    fn sample_session(healths: &[i64]) -> Session {
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

        Session::new(Uuid::new_v4(), "RT01".to_owned(), players, world)
    }

    async fn deps(round_duration: Duration) -> RuntimeDeps {
        RuntimeDeps {
            store: SummaryStore::connect("sqlite::memory:", 1).await.unwrap(),
            stash: None,
            rules: Rules::default(),
            round_duration,
            command_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn end_round_commits_before_replying() {
        let deps = deps(Duration::from_secs(600)).await;
        let store = deps.store.clone();
        let (handle, _task) = SessionRuntime::spawn(sample_session(&[10, 10]), deps);

        let after = handle.end_round(None).await.unwrap();
        assert_eq!(after.round, 2);

        // The durable row was written before the reply arrived.
        let summary = store.by_id(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(summary.latest_round, 2);
    }

    #[tokio::test]
    async fn registration_flows_through_the_command_queue() {
        let deps = deps(Duration::from_secs(600)).await;
        let (handle, _task) = SessionRuntime::spawn(sample_session(&[10, 10]), deps);

        handle
            .register_move(UserId(100), HexVector::new(1, 0))
            .await
            .unwrap();

        let err = handle
            .register_move(UserId(100), HexVector::new(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Action(ActionError::AlreadyRegistered(_))
        ));

        assert_eq!(
            handle.player_status(UserId(100)).await.unwrap(),
            Liveness::Alive
        );
    }

    #[tokio::test]
    async fn deadline_timer_resolves_the_round() {
        let deps = deps(Duration::from_secs(1)).await;
        let (handle, _task) = SessionRuntime::spawn(sample_session(&[10, 10]), deps);
        let mut topic = handle.subscribe();

        let message = tokio::time::timeout(Duration::from_secs(5), topic.recv())
            .await
            .expect("deadline timer never fired")
            .unwrap();

        match message {
            SessionMessage::RoundAdvanced(session) => assert_eq!(session.round, 2),
            other => panic!("expected a round broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conclusion_broadcasts_once_and_exits_without_restart_signal() {
        let deps = deps(Duration::from_secs(600)).await;
        let (handle, task) = SessionRuntime::spawn(sample_session(&[10, 1]), deps);
        let mut topic = handle.subscribe();

        handle
            .register_attack(UserId(100), PlayerId(2))
            .await
            .unwrap();
        let after = handle.end_round(None).await.unwrap();
        assert_eq!(after.status, SessionStatus::Concluded);

        assert!(matches!(
            topic.recv().await.unwrap(),
            SessionMessage::RoundAdvanced(_)
        ));
        assert!(matches!(
            topic.recv().await.unwrap(),
            SessionMessage::Concluded(_)
        ));

        assert_eq!(task.await.unwrap(), ExitReason::Concluded);

        // The runtime is gone; later commands see an unavailable session.
        assert_eq!(handle.session().await.unwrap_err(), RuntimeError::Unavailable);
    }

    #[tokio::test]
    async fn stash_publishes_state_and_exits() {
        let mut deps = deps(Duration::from_secs(600)).await;
        let sink = Arc::new(RecordingSink::default());
        deps.stash = Some(sink.clone());

        let (handle, task) = SessionRuntime::spawn(sample_session(&[10, 10]), deps);

        handle.stash().await.unwrap();
        assert_eq!(task.await.unwrap(), ExitReason::Stashed);

        let stashed = sink.0.lock();
        assert_eq!(stashed.len(), 1);
        assert_eq!(stashed[0].id, handle.session_id());
    }

    #[tokio::test]
    async fn stop_exits_without_stashing() {
        let mut deps = deps(Duration::from_secs(600)).await;
        let sink = Arc::new(RecordingSink::default());
        deps.stash = Some(sink.clone());

        let (handle, task) = SessionRuntime::spawn(sample_session(&[10, 10]), deps);

        handle.stop().await.unwrap();
        assert_eq!(task.await.unwrap(), ExitReason::Stopped);
        assert!(sink.0.lock().is_empty());
    }
}
