use hexarena_session::Session;
use serde_json::Value;
use thiserror::Error;

use crate::migrate;

/// A snapshot that cannot be turned back into a [`Session`].
///
/// Both variants are fatal for the session they belong to: the runtime must
/// not boot from such a snapshot, and supervisors must not retry.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot does not match the session schema: {0}")]
    BadSchema(String),
    #[error("snapshot version {0} has no registered upgrade path")]
    InvalidVersion(i64),
}

/// Snapshot fields this schema version understands. Anything else found on
/// decode rides along in the session's catch-all.
const KNOWN_FIELDS: [&str; 10] = [
    "id",
    "join_code",
    "status",
    "round",
    "round_end_time",
    "players",
    "world",
    "registered_actions",
    "events_log",
    "version",
];

/// Encodes a session into its stable JSON snapshot form.
///
/// Structured map keys (coordinates) are canonicalized to strings, tagged
/// unions carry a `kind` discriminator, and timestamps are RFC-3339 UTC with
/// second precision. The encoding round-trips through [`decode`].
pub fn encode(session: &Session) -> Result<Value, SnapshotError> {
    let mut value =
        serde_json::to_value(session).map_err(|e| SnapshotError::BadSchema(e.to_string()))?;

    // Re-attach fields carried over from a newer schema.
    if let Some(object) = value.as_object_mut() {
        for (key, extra) in &session.extra {
            object.entry(key.clone()).or_insert_with(|| extra.clone());
        }
    }

    Ok(value)
}

/// Decodes a snapshot, upgrading it from whatever schema version it carries.
///
/// Fields this build does not understand are preserved in the session's
/// catch-all; unknown `kind` discriminators are a [`SnapshotError::BadSchema`].
pub fn decode(value: Value) -> Result<Session, SnapshotError> {
    let value = migrate::upgrade(value)?;

    let mut session: Session =
        serde_json::from_value(value.clone()).map_err(|e| SnapshotError::BadSchema(e.to_string()))?;

    if let Some(object) = value.as_object() {
        session.extra = object
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, extra)| (key.clone(), extra.clone()))
            .collect();
    }

    Ok(session)
}
