use std::collections::{BTreeMap, BTreeSet};

use hexarena_world::{Coord, PlayerId};
use serde::{Deserialize, Serialize};

/// Something that happened during round resolution. Events are immutable once
/// appended and are never deleted.
///
/// Ids are dense consecutive integers assigned in insertion order, so they
/// double as a total order over everything that ever happened in a session.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    PcLeftHex {
        id: i64,
        round: i64,
        player_id: PlayerId,
        from: Coord,
        to: Coord,
    },
    PcEnteredHex {
        id: i64,
        round: i64,
        player_id: PlayerId,
        from: Coord,
        to: Coord,
    },
    PcAttackedPc {
        id: i64,
        round: i64,
        player_id: PlayerId,
        target_id: PlayerId,
    },
}

impl Event {
    pub fn id(&self) -> i64 {
        match self {
            Event::PcLeftHex { id, .. }
            | Event::PcEnteredHex { id, .. }
            | Event::PcAttackedPc { id, .. } => *id,
        }
    }

    pub fn round(&self) -> i64 {
        match self {
            Event::PcLeftHex { round, .. }
            | Event::PcEnteredHex { round, .. }
            | Event::PcAttackedPc { round, .. } => *round,
        }
    }

    /// The player the event originates from.
    pub fn player_id(&self) -> PlayerId {
        match self {
            Event::PcLeftHex { player_id, .. }
            | Event::PcEnteredHex { player_id, .. }
            | Event::PcAttackedPc { player_id, .. } => *player_id,
        }
    }

    fn with_id(mut self, new_id: i64) -> Self {
        match &mut self {
            Event::PcLeftHex { id, .. }
            | Event::PcEnteredHex { id, .. }
            | Event::PcAttackedPc { id, .. } => *id = new_id,
        }

        self
    }
}

/// Append-only log of typed events plus a per-player visibility index.
///
/// The visibility lists are newest-first. An event that nobody would see is
/// not recorded at all.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: BTreeMap<i64, Event>,
    events_visible_by_player: BTreeMap<PlayerId, Vec<i64>>,
}

impl EventLog {
    /// An empty log with one empty visibility list per player.
    pub fn new(players: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            events: BTreeMap::new(),
            events_visible_by_player: players.into_iter().map(|p| (p, Vec::new())).collect(),
        }
    }

    /// Appends `event` with the next dense id and indexes it for every player
    /// in `visible_to`. Returns the assigned id, or `None` when `visible_to`
    /// is empty, in which case nothing is recorded.
    pub fn append(&mut self, event: Event, visible_to: &BTreeSet<PlayerId>) -> Option<i64> {
        if visible_to.is_empty() {
            return None;
        }

        let id = self.events.len() as i64;
        self.events.insert(id, event.with_id(id));

        for player in visible_to {
            self.events_visible_by_player
                .entry(*player)
                .or_default()
                .insert(0, id);
        }

        Some(id)
    }

    pub fn events(&self) -> &BTreeMap<i64, Event> {
        &self.events
    }

    pub fn get(&self, id: i64) -> Option<&Event> {
        self.events.get(&id)
    }

    /// Ids visible to `player`, newest first.
    pub fn visible_to(&self, player: PlayerId) -> &[i64] {
        self.events_visible_by_player
            .get(&player)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.events_visible_by_player.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
