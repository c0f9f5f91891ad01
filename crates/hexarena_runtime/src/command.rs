use hexarena_session::{ActionError, Liveness, Session, UserId};
use hexarena_world::{HexVector, PlayerId};
use time::OffsetDateTime;
use tokio::sync::oneshot;

/// A command sent to a session runtime. Commands are processed one at a time;
/// the reply channel completes once the command has been fully applied.
#[derive(Debug)]
pub enum SessionCommand {
    Get {
        reply: oneshot::Sender<Session>,
    },
    RegisterMove {
        user_id: UserId,
        vector: HexVector,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    RegisterAttack {
        user_id: UserId,
        target_id: PlayerId,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    /// Resolves the current round immediately. `now` is an override for
    /// tests; production callers pass `None` and the runtime uses the wall
    /// clock.
    EndRound {
        now: Option<OffsetDateTime>,
        reply: oneshot::Sender<Session>,
    },
    PlayerStatus {
        user_id: UserId,
        reply: oneshot::Sender<Liveness>,
    },
    /// Publishes the session to the handoff sink and exits without restart.
    /// Sent to every active runtime during graceful node shutdown.
    Stash {
        reply: oneshot::Sender<()>,
    },
    /// Exits without stashing and without restart.
    Stop {
        reply: oneshot::Sender<()>,
    },
}
