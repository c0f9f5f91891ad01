use hexarena_world::PlayerId;
use thiserror::Error;

use crate::action::ActionKind;
use crate::player::UserId;

/// A rejected action registration. These are values returned to the caller;
/// none of them mutate the session.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ActionError {
    #[error("user {0} is not a player of this session")]
    NotAPlayer(UserId),
    #[error("the session has concluded")]
    SessionConcluded,
    #[error("the round has already ended")]
    RoundEnded,
    #[error("your character is dead")]
    PcDead,
    #[error("vector {0:?} is not a single hex step onto the grid")]
    MalformedVector(hexarena_world::HexVector),
    #[error("target {0} is dead")]
    TargetDead(PlayerId),
    #[error("target {0} is not a player of this session")]
    UnknownTarget(PlayerId),
    #[error("target {0} is not in the same hex")]
    TargetNotInSameHex(PlayerId),
    #[error("not enough action points: need {required}, have {available}")]
    InsufficientActionPoints { required: i64, available: i64 },
    #[error("a {0} action is already registered for this round")]
    AlreadyRegistered(ActionKind),
}
