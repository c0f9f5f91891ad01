use std::collections::BTreeMap;

use hexarena_world::{HexVector, PlayerId, World};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::action::{ActionKind, RegisteredAction};
use crate::error::ActionError;
use crate::event::EventLog;
use crate::player::{Liveness, Player, UserId};
use crate::SCHEMA_VERSION;

/// The action-point economy and combat numbers. These are runtime
/// configuration owned by the operator, never serialized into snapshots.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Rules {
    /// Action points deducted when a move is registered.
    pub move_cost: i64,
    /// Action points deducted when an attack is registered.
    pub attack_cost: i64,
    /// Health subtracted from the target of an attack.
    pub attack_damage: i64,
    /// Action points granted to each survivor at the end of a round.
    pub ap_per_round: i64,
    /// Ceiling on banked action points.
    pub ap_cap: i64,
    /// Action points a character starts the game with.
    pub starting_ap: i64,
    /// Health a character starts the game with.
    pub starting_health: i64,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            move_cost: 1,
            attack_cost: 1,
            attack_damage: 1,
            ap_per_round: 1,
            ap_cap: 5,
            starting_ap: 1,
            starting_health: 10,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Concluded,
}

/// The full authoritative state of one game session.
///
/// A session is a plain value: the concurrent runtime in `hexarena_runtime`
/// owns exactly one and is its single writer. All mutating methods validate
/// first and leave the state untouched on error.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub join_code: String,
    pub status: SessionStatus,
    /// Current round number, starting at 1.
    pub round: i64,
    /// Wall-clock deadline of the current round, UTC with second precision.
    /// `None` until the session runtime arms the first deadline.
    #[serde(with = "time::serde::rfc3339::option")]
    pub round_end_time: Option<OffsetDateTime>,
    pub players: BTreeMap<PlayerId, Player>,
    pub world: World,
    pub registered_actions: BTreeMap<PlayerId, Vec<RegisteredAction>>,
    pub events_log: EventLog,
    pub version: i64,
    /// Fields written by a future schema that this build does not understand
    /// yet. The snapshot codec carries them across a decode/encode round
    /// trip so rolling back a node does not destroy them.
    #[serde(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Truncates to whole seconds, the precision round deadlines are stored at.
pub(crate) fn truncate_to_second(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(0).unwrap_or(t)
}

impl Session {
    pub fn new(id: Uuid, join_code: String, players: Vec<Player>, world: World) -> Self {
        let player_ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();

        Self {
            id,
            join_code,
            status: SessionStatus::Active,
            round: 1,
            round_end_time: None,
            players: players.into_iter().map(|p| (p.id, p)).collect(),
            world,
            registered_actions: BTreeMap::new(),
            events_log: EventLog::new(player_ids),
            version: SCHEMA_VERSION,
            extra: serde_json::Map::new(),
        }
    }

    pub fn player_by_user(&self, user_id: UserId) -> Option<&Player> {
        self.players.values().find(|p| p.user_id == user_id)
    }

    /// Whether the character of `user_id` is alive, dead, or not part of this
    /// session at all.
    pub fn liveness(&self, user_id: UserId) -> Liveness {
        match self.player_by_user(user_id) {
            None => Liveness::Unknown,
            Some(player) if self.world.is_alive(player.id) => Liveness::Alive,
            Some(_) => Liveness::Dead,
        }
    }

    pub fn has_registered(&self, player_id: PlayerId, kind: ActionKind) -> bool {
        self.registered_actions
            .get(&player_id)
            .is_some_and(|actions| actions.iter().any(|a| a.kind() == kind))
    }

    /// Registers a move for the current round and deducts its cost.
    pub fn register_move(
        &mut self,
        user_id: UserId,
        vector: HexVector,
        rules: &Rules,
        now: OffsetDateTime,
    ) -> Result<(), ActionError> {
        let player_id = self.validate_actor(user_id, now)?;

        // Moves are one hex per round, and the destination must exist:
        // movement is unconditional at resolution time, so the grid edge is
        // enforced here.
        let destination = self
            .world
            .pc(player_id)
            .map(|pc| pc.position.apply(vector));

        if !vector.is_direction() || !destination.is_some_and(|d| self.world.grid().contains(d)) {
            return Err(ActionError::MalformedVector(vector));
        }

        if self.has_registered(player_id, ActionKind::Move) {
            return Err(ActionError::AlreadyRegistered(ActionKind::Move));
        }

        self.charge(player_id, rules.move_cost)?;
        self.registered_actions
            .entry(player_id)
            .or_default()
            .push(RegisteredAction::Move { vector });

        Ok(())
    }

    /// Registers an attack against `target_id` for the current round and
    /// deducts its cost.
    pub fn register_attack(
        &mut self,
        user_id: UserId,
        target_id: PlayerId,
        rules: &Rules,
        now: OffsetDateTime,
    ) -> Result<(), ActionError> {
        let player_id = self.validate_actor(user_id, now)?;

        if !self.players.contains_key(&target_id) {
            return Err(ActionError::UnknownTarget(target_id));
        }

        if !self.world.is_alive(target_id) {
            return Err(ActionError::TargetDead(target_id));
        }

        let attacker_pos = self.world.pc(player_id).map(|pc| pc.position);
        let target_pos = self.world.pc(target_id).map(|pc| pc.position);

        if attacker_pos != target_pos {
            return Err(ActionError::TargetNotInSameHex(target_id));
        }

        if self.has_registered(player_id, ActionKind::Attack) {
            return Err(ActionError::AlreadyRegistered(ActionKind::Attack));
        }

        self.charge(player_id, rules.attack_cost)?;
        self.registered_actions
            .entry(player_id)
            .or_default()
            .push(RegisteredAction::Attack { target_id });

        Ok(())
    }

    /// Shared validation for both registration paths: the session accepts
    /// actions, the user is a player, and their character is alive.
    fn validate_actor(
        &self,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> Result<PlayerId, ActionError> {
        if self.status == SessionStatus::Concluded {
            return Err(ActionError::SessionConcluded);
        }

        let player = self
            .player_by_user(user_id)
            .ok_or(ActionError::NotAPlayer(user_id))?;

        if let Some(deadline) = self.round_end_time {
            if now >= deadline {
                return Err(ActionError::RoundEnded);
            }
        }

        if !self.world.is_alive(player.id) {
            return Err(ActionError::PcDead);
        }

        Ok(player.id)
    }

    fn charge(&mut self, player_id: PlayerId, cost: i64) -> Result<(), ActionError> {
        let available = self
            .world
            .pc(player_id)
            .map(|pc| pc.action_points)
            .unwrap_or_default();

        if available < cost {
            return Err(ActionError::InsufficientActionPoints {
                required: cost,
                available,
            });
        }

        self.world.spend_action_points(player_id, cost);

        Ok(())
    }

    /// Arms the first round deadline if the session does not carry one yet.
    pub fn ensure_deadline(&mut self, deadline: OffsetDateTime) {
        if self.round_end_time.is_none() && self.status == SessionStatus::Active {
            self.round_end_time = Some(truncate_to_second(deadline));
        }
    }
}

#[cfg(test)]
mod tests {
    use hexarena_world::{Coord, Grid, PlayerCharacter};
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;
    use crate::player::PlayerStatus;

    fn test_session(pcs: &[(i64, Coord, i64, i64)]) -> Session {
        let players = pcs
            .iter()
            .map(|&(id, ..)| Player {
                id: PlayerId(id),
                user_id: UserId(id * 100),
                display_name: format!("player-{id}"),
                status: PlayerStatus::Active,
            })
            .collect();

        let world = World::new(
            Grid::hexagon(3),
            pcs.iter()
                .map(|&(id, position, health, action_points)| PlayerCharacter {
                    player_id: PlayerId(id),
                    position,
                    health,
                    action_points,
                }),
        )
        .unwrap();

        Session::new(Uuid::new_v4(), "KV7Q".to_owned(), players, world)
    }

    fn now() -> OffsetDateTime {
        datetime!(2024-06-01 12:00:00 UTC)
    }

    #[test]
    fn register_move_charges_action_points() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 2),
            (2, Coord::new(1, 0), 10, 2),
        ]);

        session
            .register_move(UserId(100), HexVector::new(1, 0), &Rules::default(), now())
            .unwrap();

        assert_eq!(session.world.pc(PlayerId(1)).unwrap().action_points, 1);
        assert_eq!(
            session.registered_actions[&PlayerId(1)],
            [RegisteredAction::Move {
                vector: HexVector::new(1, 0)
            }]
        );
    }

    #[test]
    fn non_unit_or_off_grid_moves_are_malformed() {
        // Player 1 sits on the eastern edge of the radius-3 board.
        let mut session = test_session(&[
            (1, Coord::new(3, 0), 10, 5),
            (2, Coord::new(0, 0), 10, 5),
        ]);
        let rules = Rules::default();

        let off_grid = session
            .register_move(UserId(100), HexVector::new(1, 0), &rules, now())
            .unwrap_err();
        assert_eq!(off_grid, ActionError::MalformedVector(HexVector::new(1, 0)));

        let two_step = session
            .register_move(UserId(100), HexVector::new(-2, 0), &rules, now())
            .unwrap_err();
        assert_eq!(two_step, ActionError::MalformedVector(HexVector::new(-2, 0)));

        // A legal single step inward still works.
        session
            .register_move(UserId(100), HexVector::new(-1, 0), &rules, now())
            .unwrap();
    }

    #[test]
    fn second_move_in_one_round_is_rejected() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 5),
            (2, Coord::new(1, 0), 10, 5),
        ]);
        let rules = Rules::default();

        session
            .register_move(UserId(100), HexVector::new(1, 0), &rules, now())
            .unwrap();
        let err = session
            .register_move(UserId(100), HexVector::new(0, 1), &rules, now())
            .unwrap_err();

        assert_eq!(err, ActionError::AlreadyRegistered(ActionKind::Move));
    }

    #[test]
    fn move_and_attack_may_share_a_round_when_ap_allows() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 2),
            (2, Coord::new(0, 0), 10, 2),
        ]);
        let rules = Rules::default();

        session
            .register_attack(UserId(100), PlayerId(2), &rules, now())
            .unwrap();
        session
            .register_move(UserId(100), HexVector::new(1, 0), &rules, now())
            .unwrap();

        assert_eq!(session.registered_actions[&PlayerId(1)].len(), 2);
    }

    #[test]
    fn insufficient_action_points_is_reported_with_balance() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 0),
            (2, Coord::new(1, 0), 10, 1),
        ]);

        let err = session
            .register_move(UserId(100), HexVector::new(1, 0), &Rules::default(), now())
            .unwrap_err();

        assert_eq!(
            err,
            ActionError::InsufficientActionPoints {
                required: 1,
                available: 0,
            }
        );
    }

    #[test]
    fn attack_requires_shared_hex() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 1),
            (2, Coord::new(1, 0), 10, 1),
        ]);

        let err = session
            .register_attack(UserId(100), PlayerId(2), &Rules::default(), now())
            .unwrap_err();

        assert_eq!(err, ActionError::TargetNotInSameHex(PlayerId(2)));
    }

    #[test]
    fn attack_rejects_unknown_and_dead_targets() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 1),
            (2, Coord::new(0, 0), 0, 1),
        ]);
        let rules = Rules::default();

        assert_eq!(
            session
                .register_attack(UserId(100), PlayerId(9), &rules, now())
                .unwrap_err(),
            ActionError::UnknownTarget(PlayerId(9))
        );
        assert_eq!(
            session
                .register_attack(UserId(100), PlayerId(2), &rules, now())
                .unwrap_err(),
            ActionError::TargetDead(PlayerId(2))
        );
    }

    #[test]
    fn registration_after_deadline_is_round_ended() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 1),
            (2, Coord::new(1, 0), 10, 1),
        ]);
        session.round_end_time = Some(now());

        let err = session
            .register_move(UserId(100), HexVector::new(1, 0), &Rules::default(), now())
            .unwrap_err();

        assert_eq!(err, ActionError::RoundEnded);
    }

    #[test]
    fn registration_on_concluded_session_fails() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 10, 1),
            (2, Coord::new(1, 0), 10, 1),
        ]);
        session.status = SessionStatus::Concluded;

        let err = session
            .register_move(UserId(100), HexVector::new(1, 0), &Rules::default(), now())
            .unwrap_err();

        assert_eq!(err, ActionError::SessionConcluded);
    }

    #[test]
    fn outsiders_and_dead_characters_are_rejected() {
        let mut session = test_session(&[
            (1, Coord::new(0, 0), 0, 1),
            (2, Coord::new(1, 0), 10, 1),
        ]);
        let rules = Rules::default();

        assert_eq!(
            session
                .register_move(UserId(999), HexVector::new(1, 0), &rules, now())
                .unwrap_err(),
            ActionError::NotAPlayer(UserId(999))
        );
        assert_eq!(
            session
                .register_move(UserId(100), HexVector::new(1, 0), &rules, now())
                .unwrap_err(),
            ActionError::PcDead
        );
    }

    #[test]
    fn liveness_tracks_world_state() {
        let session = test_session(&[
            (1, Coord::new(0, 0), 10, 1),
            (2, Coord::new(1, 0), 0, 1),
        ]);

        assert_eq!(session.liveness(UserId(100)), Liveness::Alive);
        assert_eq!(session.liveness(UserId(200)), Liveness::Dead);
        assert_eq!(session.liveness(UserId(999)), Liveness::Unknown);
    }
}
