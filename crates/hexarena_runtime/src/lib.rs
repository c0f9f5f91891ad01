#![doc = include_str!("../README.md")]

mod command;
mod handle;
mod runtime;

pub use command::SessionCommand;
pub use handle::{RuntimeError, SessionHandle, SessionMessage};
pub use runtime::{ExitReason, RuntimeDeps, SessionRuntime, StashSink};
