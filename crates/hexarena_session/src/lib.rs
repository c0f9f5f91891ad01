#![doc = include_str!("../README.md")]

mod action;
mod error;
mod event;
mod player;
mod resolve;
mod session;

pub use action::{ActionKind, RegisteredAction};
pub use error::ActionError;
pub use event::{Event, EventLog};
pub use player::{Liveness, Player, PlayerStatus, UserId};
pub use resolve::resolve_round;
pub use session::{Rules, Session, SessionStatus};

/// Version of the session snapshot schema produced by this build. Snapshots
/// carrying older versions are upgraded by `hexarena_store::migrate` before
/// use.
pub const SCHEMA_VERSION: i64 = 4;
