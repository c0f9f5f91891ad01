use std::collections::BTreeSet;

use hexarena_world::{Coord, PlayerId, World};
use time::OffsetDateTime;

use crate::action::RegisteredAction;
use crate::event::Event;
use crate::session::{truncate_to_second, Rules, Session, SessionStatus};

/// One move extracted from the registered actions, resolved against the
/// pre-move world.
struct MoveRecord {
    player_id: PlayerId,
    from: Coord,
    to: Coord,
}

/// Ids of living characters standing on `coord`.
fn ids_at(world: &World, coord: Coord) -> BTreeSet<PlayerId> {
    world.pcs_at(coord).map(|pc| pc.player_id).collect()
}

/// Resolves the current round: applies every registered action
/// simultaneously, appends the round's events with their visibility, buries
/// the fallen, grants action points, and advances the round counter.
///
/// This is a pure function of its inputs; callers supply the next round
/// deadline. Determinism: all ties are broken by ascending player id, and all
/// iteration happens over ordered maps.
///
/// Phase order is `attacks -> moves -> burial -> regen`; new action kinds
/// must pick a documented slot in this sequence.
pub fn resolve_round(
    mut session: Session,
    next_round_end: OffsetDateTime,
    rules: &Rules,
) -> Session {
    let round = session.round;

    let mut moves = Vec::new();
    let mut attacks = Vec::new();

    for (&player_id, actions) in &session.registered_actions {
        for action in actions {
            match *action {
                RegisteredAction::Move { vector } => moves.push((player_id, vector)),
                RegisteredAction::Attack { target_id } => attacks.push((player_id, target_id)),
            }
        }
    }

    // Attacks are simultaneous: nobody's position changes during this phase,
    // so witness sets come from the positions everyone held entering it.
    for (attacker, target) in attacks {
        session.world.apply_damage(target, rules.attack_damage);

        let attacker_pos = session
            .world
            .pc(attacker)
            .expect("attacker vanished before resolution")
            .position;

        session.events_log.append(
            Event::PcAttackedPc {
                id: 0,
                round,
                player_id: attacker,
                target_id: target,
            },
            &ids_at(&session.world, attacker_pos),
        );
    }

    // Moves are simultaneous as well: every displacement is computed against
    // the same pre-move snapshot, then applied unconditionally.
    let pre_world = session.world.clone();

    let records: Vec<MoveRecord> = moves
        .iter()
        .map(|&(player_id, vector)| {
            let from = pre_world
                .pc(player_id)
                .expect("mover vanished before resolution")
                .position;

            MoveRecord {
                player_id,
                from,
                to: from.apply(vector),
            }
        })
        .collect();

    for record in &records {
        session.world.move_pc(record.player_id, record.to);
    }

    let post_world = &session.world;

    // All departures are logged before all arrivals, each group in ascending
    // mover id, so within a round every left-event id precedes every
    // entered-event id.
    for record in &records {
        let mut witnesses = ids_at(&pre_world, record.from);

        for arrived in ids_at(post_world, record.to) {
            witnesses.remove(&arrived);
        }

        session.events_log.append(
            Event::PcLeftHex {
                id: 0,
                round,
                player_id: record.player_id,
                from: record.from,
                to: record.to,
            },
            &witnesses,
        );
    }

    for record in &records {
        session.events_log.append(
            Event::PcEnteredHex {
                id: 0,
                round,
                player_id: record.player_id,
                from: record.from,
                to: record.to,
            },
            &ids_at(post_world, record.to),
        );
    }

    session.world.bury_dead();
    session
        .world
        .regen_action_points(rules.ap_per_round, rules.ap_cap);

    session.registered_actions.clear();
    session.round = round + 1;
    session.round_end_time = Some(truncate_to_second(next_round_end));

    if session.world.alive_count() < 2 {
        session.status = SessionStatus::Concluded;
    }

    session
}
