#![doc = include_str!("../README.md")]

pub use hexarena_cluster as cluster;
pub use hexarena_runtime as runtime;
pub use hexarena_session as session;
pub use hexarena_store as store;
pub use hexarena_world as world;

mod config;
mod error;
mod server;
pub mod testing;

pub use config::CoreSettings;
pub use error::{Error, ErrorKind};
pub use server::{HexarenaCore, NewUser};

/// The most commonly used items, all in one import.
pub mod prelude {
    pub use hexarena_cluster::{ClusterError, Fabric, NodeId, PlacementRegistry};
    pub use hexarena_runtime::{SessionHandle, SessionMessage};
    pub use hexarena_session::{
        ActionError, Event, EventLog, Liveness, Player, RegisteredAction, Rules, Session,
        SessionStatus, UserId,
    };
    pub use hexarena_world::{Coord, Grid, Hex, HexVector, PlayerCharacter, PlayerId, World};

    pub use crate::{CoreSettings, Error, ErrorKind, HexarenaCore, NewUser};
}

#[cfg(test)]
mod tests;
