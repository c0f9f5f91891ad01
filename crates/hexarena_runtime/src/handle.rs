use std::sync::Arc;
use std::time::Duration;

use hexarena_session::{ActionError, Liveness, Session, UserId};
use hexarena_world::{HexVector, PlayerId};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::command::SessionCommand;

/// A message published on a session's topic. Broadcasts are fire-and-forget;
/// subscribers that fall behind can always poll [`SessionHandle::session`].
#[derive(Clone, Debug)]
pub enum SessionMessage {
    /// A round resolved. Carries the full post-round session snapshot.
    RoundAdvanced(Arc<Session>),
    /// The session transitioned to concluded. Emitted exactly once.
    Concluded(Arc<Session>),
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("command timed out")]
    Timeout,
    #[error("session runtime is not available")]
    Unavailable,
}

/// A clonable handle to one session runtime. All accessors serialize through
/// the runtime's command queue and apply the configured per-call timeout.
///
/// A timed-out command may still be applied by the runtime; registration
/// commands are idempotent per round and player, so retrying them is safe.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: Uuid,
    join_code: String,
    commands: flume::Sender<SessionCommand>,
    events: broadcast::Sender<SessionMessage>,
    command_timeout: Duration,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: Uuid,
        join_code: String,
        commands: flume::Sender<SessionCommand>,
        events: broadcast::Sender<SessionMessage>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            join_code,
            commands,
            events,
            command_timeout,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn join_code(&self) -> &str {
        &self.join_code
    }

    /// Subscribes to the session's topic.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionMessage> {
        self.events.subscribe()
    }

    /// A copy of the current session state.
    pub async fn session(&self) -> Result<Session, RuntimeError> {
        self.call(|reply| SessionCommand::Get { reply }).await
    }

    pub async fn register_move(
        &self,
        user_id: UserId,
        vector: HexVector,
    ) -> Result<(), RuntimeError> {
        self.call(|reply| SessionCommand::RegisterMove {
            user_id,
            vector,
            reply,
        })
        .await?
        .map_err(RuntimeError::from)
    }

    pub async fn register_attack(
        &self,
        user_id: UserId,
        target_id: PlayerId,
    ) -> Result<(), RuntimeError> {
        self.call(|reply| SessionCommand::RegisterAttack {
            user_id,
            target_id,
            reply,
        })
        .await?
        .map_err(RuntimeError::from)
    }

    /// Resolves the current round and returns the post-round session. The
    /// runtime commits the round to the durable store before replying.
    pub async fn end_round(&self, now: Option<OffsetDateTime>) -> Result<Session, RuntimeError> {
        self.call(|reply| SessionCommand::EndRound { now, reply })
            .await
    }

    pub async fn player_status(&self, user_id: UserId) -> Result<Liveness, RuntimeError> {
        self.call(|reply| SessionCommand::PlayerStatus { user_id, reply })
            .await
    }

    /// Asks the runtime to stash its state for handoff and exit. Used during
    /// graceful node shutdown.
    pub async fn stash(&self) -> Result<(), RuntimeError> {
        self.call(|reply| SessionCommand::Stash { reply }).await
    }

    /// Asks the runtime to exit without stashing.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.call(|reply| SessionCommand::Stop { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();

        self.commands
            .send_async(command(reply))
            .await
            .map_err(|_| RuntimeError::Unavailable)?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            // The runtime dropped the reply without answering: it is exiting.
            Ok(Err(_)) => Err(RuntimeError::Unavailable),
            Err(_) => Err(RuntimeError::Timeout),
        }
    }
}
