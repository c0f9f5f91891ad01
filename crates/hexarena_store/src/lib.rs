#![doc = include_str!("../README.md")]

mod migrate;
mod snapshot;
mod store;

pub use migrate::upgrade;
pub use snapshot::{decode, encode, SnapshotError};
pub use store::{ActiveSessionRow, SessionSummary, StoreError, SummaryStore};
