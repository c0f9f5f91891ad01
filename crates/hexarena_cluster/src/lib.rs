#![doc = include_str!("../README.md")]

mod fabric;
mod handoff;
mod node;
mod registry;
mod ring;

pub use fabric::Fabric;
pub use handoff::{handoff_key, HandoffStore};
pub use node::{ClusterEvent, NodeId};
pub use registry::{ClusterError, PlacementRegistry, RegistrySettings};
