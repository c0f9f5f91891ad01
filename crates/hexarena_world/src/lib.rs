#![doc = include_str!("../README.md")]

mod coord;
mod world;

pub use coord::{Coord, CoordParseError, HexVector};
pub use world::{Grid, Hex, PlayerCharacter, PlayerId, World, WorldError};
