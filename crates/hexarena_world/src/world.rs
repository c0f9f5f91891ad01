use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::Coord;

/// Identifies a player within a single session.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Metadata for one grid cell. Currently carries nothing beyond its identity,
/// but is kept open so the grid schema can grow.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Hex {}

/// A finite mapping from coordinates to cells. Immutable once the world is
/// created.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Grid {
    hexes: BTreeMap<Coord, Hex>,
}

impl Grid {
    pub fn new(hexes: BTreeMap<Coord, Hex>) -> Self {
        Self { hexes }
    }

    /// The standard hexagonal board of the given radius centered on the
    /// origin. A radius of zero is the single origin cell.
    pub fn hexagon(radius: i64) -> Self {
        let mut hexes = BTreeMap::new();

        for q in -radius..=radius {
            for r in (-radius).max(-q - radius)..=radius.min(-q + radius) {
                hexes.insert(Coord::new(q, r), Hex::default());
            }
        }

        Self { hexes }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.hexes.contains_key(&coord)
    }

    pub fn get(&self, coord: Coord) -> Option<&Hex> {
        self.hexes.get(&coord)
    }

    /// Cells in ascending coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (Coord, &Hex)> + '_ {
        self.hexes.iter().map(|(&coord, hex)| (coord, hex))
    }

    pub fn len(&self) -> usize {
        self.hexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hexes.is_empty()
    }
}

// Coordinates are structured map keys, so the grid serializes under the
// canonical "q,r" string encoding rather than as a list of pairs.
impl Serialize for Grid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.hexes.len()))?;

        for (coord, hex) in &self.hexes {
            map.serialize_entry(&coord.to_string(), hex)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Grid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GridVisitor;

        impl<'de> Visitor<'de> for GridVisitor {
            type Value = Grid;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of \"q,r\" keys to hexes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Grid, A::Error> {
                let mut hexes = BTreeMap::new();

                while let Some((key, hex)) = access.next_entry::<String, Hex>()? {
                    let coord = key.parse().map_err(de::Error::custom)?;
                    hexes.insert(coord, hex);
                }

                Ok(Grid { hexes })
            }
        }

        deserializer.deserialize_map(GridVisitor)
    }
}

/// A player's in-game avatar.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlayerCharacter {
    pub player_id: PlayerId,
    pub position: Coord,
    pub health: i64,
    pub action_points: i64,
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum WorldError {
    #[error("player {player_id} placed at {position}, which is not on the grid")]
    OffGrid {
        player_id: PlayerId,
        position: Coord,
    },
    #[error("player {0} appears more than once")]
    DuplicatePlayer(PlayerId),
}

/// The authoritative game world of one session: the grid plus every living
/// and dead player character.
///
/// Invariants upheld by this type:
/// - every living character's position lies on the grid;
/// - a player id appears in exactly one of `player_characters` and
///   `dead_characters`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct World {
    grid: Grid,
    player_characters: BTreeMap<PlayerId, PlayerCharacter>,
    dead_characters: BTreeMap<PlayerId, PlayerCharacter>,
}

impl World {
    pub fn new(
        grid: Grid,
        characters: impl IntoIterator<Item = PlayerCharacter>,
    ) -> Result<Self, WorldError> {
        let mut player_characters = BTreeMap::new();

        for pc in characters {
            if !grid.contains(pc.position) {
                return Err(WorldError::OffGrid {
                    player_id: pc.player_id,
                    position: pc.position,
                });
            }

            if player_characters.insert(pc.player_id, pc).is_some() {
                return Err(WorldError::DuplicatePlayer(pc.player_id));
            }
        }

        Ok(Self {
            grid,
            player_characters,
            dead_characters: BTreeMap::new(),
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn player_characters(&self) -> &BTreeMap<PlayerId, PlayerCharacter> {
        &self.player_characters
    }

    pub fn dead_characters(&self) -> &BTreeMap<PlayerId, PlayerCharacter> {
        &self.dead_characters
    }

    /// The living character for `player_id`, if any.
    pub fn pc(&self, player_id: PlayerId) -> Option<&PlayerCharacter> {
        self.player_characters.get(&player_id)
    }

    pub fn is_alive(&self, player_id: PlayerId) -> bool {
        self.player_characters
            .get(&player_id)
            .is_some_and(|pc| pc.health > 0)
    }

    pub fn alive_count(&self) -> usize {
        self.player_characters
            .values()
            .filter(|pc| pc.health > 0)
            .count()
    }

    /// Living characters standing on `coord`, in ascending player id order.
    pub fn pcs_at(&self, coord: Coord) -> impl Iterator<Item = &PlayerCharacter> + '_ {
        self.player_characters
            .values()
            .filter(move |pc| pc.position == coord)
    }

    /// Moves the character to `new_coord`.
    ///
    /// # Panics
    ///
    /// Panics if `player_id` has no living character or if `new_coord` is not
    /// on the grid. Both are programmer errors, not runtime failures.
    pub fn move_pc(&mut self, player_id: PlayerId, new_coord: Coord) {
        assert!(
            self.grid.contains(new_coord),
            "moved player {player_id} off the grid to {new_coord}"
        );

        let pc = self
            .player_characters
            .get_mut(&player_id)
            .unwrap_or_else(|| panic!("moved player {player_id} has no living character"));

        pc.position = new_coord;
    }

    /// Subtracts `amount` health from the target.
    ///
    /// # Panics
    ///
    /// Panics if `target` has no living character.
    pub fn apply_damage(&mut self, target: PlayerId, amount: i64) {
        let pc = self
            .player_characters
            .get_mut(&target)
            .unwrap_or_else(|| panic!("damaged player {target} has no living character"));

        pc.health -= amount;
    }

    /// Deducts `cost` action points.
    ///
    /// # Panics
    ///
    /// Panics if `player_id` has no living character.
    pub fn spend_action_points(&mut self, player_id: PlayerId, cost: i64) {
        let pc = self
            .player_characters
            .get_mut(&player_id)
            .unwrap_or_else(|| panic!("charged player {player_id} has no living character"));

        pc.action_points -= cost;
    }

    /// Moves every character with no health left into `dead_characters` and
    /// returns their ids in ascending order.
    pub fn bury_dead(&mut self) -> Vec<PlayerId> {
        let fallen: Vec<PlayerId> = self
            .player_characters
            .iter()
            .filter(|(_, pc)| pc.health <= 0)
            .map(|(&id, _)| id)
            .collect();

        for &id in &fallen {
            let pc = self.player_characters.remove(&id).unwrap();
            self.dead_characters.insert(id, pc);
        }

        fallen
    }

    /// Grants every living character `per_round` action points, capped at
    /// `cap`.
    pub fn regen_action_points(&mut self, per_round: i64, cap: i64) {
        for pc in self.player_characters.values_mut() {
            pc.action_points = (pc.action_points + per_round).min(cap);
        }
    }
}
