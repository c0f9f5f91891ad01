use hexarena_session::SCHEMA_VERSION;
use serde_json::{json, Value};
use tracing::debug;

use crate::snapshot::SnapshotError;

/// Upgrades a snapshot to [`SCHEMA_VERSION`], one registered step at a time.
///
/// Steps are pure JSON rewrites running before the typed decode, so no
/// historical Rust types need to be kept around. A version without a
/// registered path (non-positive, or newer than this build) is a fatal
/// [`SnapshotError::InvalidVersion`].
pub fn upgrade(mut value: Value) -> Result<Value, SnapshotError> {
    loop {
        let version = value
            .get("version")
            .and_then(Value::as_i64)
            .unwrap_or_default();

        if version == SCHEMA_VERSION {
            return Ok(value);
        }

        if version <= 0 || version > SCHEMA_VERSION {
            return Err(SnapshotError::InvalidVersion(version));
        }

        debug!(from = version, "upgrading session snapshot");

        value = match version {
            1 => v1_add_events_log(value),
            2 => v2_seed_visibility_lists(value),
            3 => v3_backfill_move_event_rounds(value),
            _ => unreachable!("version {version} covered by the range check"),
        };

        value["version"] = json!(version + 1);
    }
}

/// v1 predates the event log entirely.
fn v1_add_events_log(mut value: Value) -> Value {
    value["events_log"] = json!({
        "events": {},
        "events_visible_by_player": {},
    });

    value
}

/// v2 had events but no per-player visibility index; every player gets an
/// empty list.
fn v2_seed_visibility_lists(mut value: Value) -> Value {
    let players: Vec<String> = value
        .get("players")
        .and_then(Value::as_object)
        .map(|players| players.keys().cloned().collect())
        .unwrap_or_default();

    let visible = value
        .pointer_mut("/events_log/events_visible_by_player")
        .and_then(Value::as_object_mut);

    if let Some(visible) = visible {
        for player in players {
            visible.entry(player).or_insert_with(|| json!([]));
        }
    }

    value
}

/// v3 move events carried no round number. They are backfilled to the round
/// before the snapshot's current one, which is the latest round they can have
/// happened in.
fn v3_backfill_move_event_rounds(mut value: Value) -> Value {
    let round = value.get("round").and_then(Value::as_i64).unwrap_or(1);

    let events = value
        .pointer_mut("/events_log/events")
        .and_then(Value::as_object_mut);

    let Some(events) = events else {
        return value;
    };

    for event in events.values_mut() {
        let Some(event) = event.as_object_mut() else {
            continue;
        };

        let is_move = matches!(
            event.get("kind").and_then(Value::as_str),
            Some("pc_left_hex" | "pc_entered_hex")
        );

        if is_move && !event.contains_key("round") {
            event.insert("round".to_owned(), json!(round - 1));
        }
    }

    value
}
