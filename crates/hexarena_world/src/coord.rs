use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An axial hex coordinate.
///
/// Coordinates are compared by value and order lexicographically on `(q, r)`
/// so they can key ordered maps. The canonical string form is `"q,r"`, which
/// is the encoding used whenever a coordinate appears as a map key in the
/// snapshot wire format.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Coord {
    pub q: i64,
    pub r: i64,
}

impl Coord {
    pub const fn new(q: i64, r: i64) -> Self {
        Self { q, r }
    }

    /// Displaces this coordinate by `vector`.
    pub const fn apply(self, vector: HexVector) -> Self {
        Self {
            q: self.q + vector.q,
            r: self.r + vector.r,
        }
    }
}

impl Add<HexVector> for Coord {
    type Output = Coord;

    fn add(self, rhs: HexVector) -> Coord {
        self.apply(rhs)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{}", self.q, self.r)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("invalid coordinate key {0:?}, expected \"q,r\"")]
pub struct CoordParseError(pub String);

impl FromStr for Coord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CoordParseError(s.to_owned());

        let (q, r) = s.split_once(',').ok_or_else(err)?;

        Ok(Self {
            q: q.parse().map_err(|_| err())?,
            r: r.parse().map_err(|_| err())?,
        })
    }
}

/// A displacement between two hex coordinates.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct HexVector {
    pub q: i64,
    pub r: i64,
}

impl HexVector {
    /// The six unit displacements of an axial hex grid, clockwise from east.
    pub const DIRECTIONS: [HexVector; 6] = [
        HexVector::new(1, 0),
        HexVector::new(1, -1),
        HexVector::new(0, -1),
        HexVector::new(-1, 0),
        HexVector::new(-1, 1),
        HexVector::new(0, 1),
    ];

    pub const fn new(q: i64, r: i64) -> Self {
        Self { q, r }
    }

    /// Whether this is a single-step displacement to an adjacent hex.
    pub fn is_direction(self) -> bool {
        Self::DIRECTIONS.contains(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_vector_displaces() {
        let coord = Coord::new(-1, 0);

        assert_eq!(coord.apply(HexVector::new(1, 0)), Coord::new(0, 0));
        assert_eq!(coord + HexVector::new(0, -2), Coord::new(-1, -2));
    }

    #[test]
    fn canonical_key_round_trips() {
        for coord in [Coord::new(0, 0), Coord::new(-3, 12), Coord::new(7, -1)] {
            assert_eq!(coord.to_string().parse(), Ok(coord));
        }
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for bad in ["", "1", "1,", ",2", "a,b", "1,2,3"] {
            assert!(bad.parse::<Coord>().is_err(), "{bad:?} should not parse");
        }
    }
}
