use std::fmt;

use hexarena_world::{HexVector, PlayerId};
use serde::{Deserialize, Serialize};

/// An action a player has registered for the current round. Registered
/// actions are held until the round resolves and are cleared afterwards.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegisteredAction {
    Move { vector: HexVector },
    Attack { target_id: PlayerId },
}

impl RegisteredAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            RegisteredAction::Move { .. } => ActionKind::Move,
            RegisteredAction::Attack { .. } => ActionKind::Attack,
        }
    }
}

/// The kind of a [`RegisteredAction`]. Per player and round, at most one
/// action of each kind may be registered.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ActionKind {
    Move,
    Attack,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ActionKind::Move => "move",
            ActionKind::Attack => "attack",
        };

        f.write_str(s)
    }
}
