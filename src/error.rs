use hexarena_cluster::ClusterError;
use hexarena_runtime::RuntimeError;
use hexarena_session::ActionError;
use hexarena_store::{SnapshotError, StoreError};
use thiserror::Error;

/// Any failure of a core operation.
///
/// Variants wrap the component errors they originate from; [`Error::kind`]
/// collapses them into the canonical codes callers branch on.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("join code {0:?} must be 1 to 8 alphanumeric characters")]
    InvalidJoinCode(String),
    #[error("command timed out")]
    Timeout,
    #[error("session temporarily unavailable, retry with backoff")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Canonical error codes, one per user-visible failure class.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Unknown session id, join code, or player.
    NotFound,
    /// Duplicate join code or session placement.
    Conflict,
    /// Malformed input such as a bad vector or an unknown target.
    InvalidInput,
    /// The action violates game rules.
    Forbidden,
    /// The session or round is not in a state that accepts the operation.
    StateMismatch,
    /// The command did not complete within its budget; it may still apply.
    Timeout,
    /// Transient placement or migration gap; safe to retry with backoff.
    Unavailable,
    /// A snapshot that cannot be decoded. Fatal for that session.
    BadSchema,
    /// A snapshot version with no upgrade path. Fatal for that session.
    InvalidVersion,
    /// Invariant violation; retrying will not help.
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Action(e) => action_kind(e),
            Error::Cluster(e) => cluster_kind(e),
            Error::Store(e) => store_kind(e),
            Error::InvalidJoinCode(_) => ErrorKind::InvalidInput,
            Error::Timeout => ErrorKind::Timeout,
            Error::Unavailable => ErrorKind::Unavailable,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Action(action) => Error::Action(action),
            RuntimeError::Timeout => Error::Timeout,
            RuntimeError::Unavailable => Error::Unavailable,
        }
    }
}

fn action_kind(e: &ActionError) -> ErrorKind {
    match e {
        ActionError::NotAPlayer(_) => ErrorKind::NotFound,
        ActionError::SessionConcluded | ActionError::RoundEnded => ErrorKind::StateMismatch,
        ActionError::MalformedVector(_) | ActionError::UnknownTarget(_) => ErrorKind::InvalidInput,
        ActionError::PcDead
        | ActionError::TargetDead(_)
        | ActionError::TargetNotInSameHex(_)
        | ActionError::InsufficientActionPoints { .. }
        | ActionError::AlreadyRegistered(_) => ErrorKind::Forbidden,
    }
}

fn cluster_kind(e: &ClusterError) -> ErrorKind {
    match e {
        ClusterError::SessionNotAlive => ErrorKind::NotFound,
        ClusterError::DuplicateJoinCode(_) | ClusterError::DuplicateSession(_) => {
            ErrorKind::Conflict
        }
        ClusterError::NoMembers | ClusterError::Unavailable => ErrorKind::Unavailable,
        ClusterError::Store(store) => store_kind(store),
        ClusterError::Snapshot(snapshot) => snapshot_kind(snapshot),
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::Snapshot(snapshot) => snapshot_kind(snapshot),
        StoreError::Database(_)
        | StoreError::Migrate(_)
        | StoreError::MalformedId(_)
        | StoreError::UnknownStatus(_) => ErrorKind::Internal,
    }
}

fn snapshot_kind(e: &SnapshotError) -> ErrorKind {
    match e {
        SnapshotError::BadSchema(_) => ErrorKind::BadSchema,
        SnapshotError::InvalidVersion(_) => ErrorKind::InvalidVersion,
    }
}

#[cfg(test)]
mod tests {
    use hexarena_session::UserId;
    use hexarena_world::{HexVector, PlayerId};

    use super::*;

    #[test]
    fn kinds_collapse_to_canonical_codes() {
        let cases: Vec<(Error, ErrorKind)> = vec![
            (ActionError::NotAPlayer(UserId(1)).into(), ErrorKind::NotFound),
            (ActionError::SessionConcluded.into(), ErrorKind::StateMismatch),
            (ActionError::RoundEnded.into(), ErrorKind::StateMismatch),
            (ActionError::PcDead.into(), ErrorKind::Forbidden),
            (
                ActionError::MalformedVector(HexVector::new(3, 3)).into(),
                ErrorKind::InvalidInput,
            ),
            (
                ActionError::TargetNotInSameHex(PlayerId(2)).into(),
                ErrorKind::Forbidden,
            ),
            (ClusterError::SessionNotAlive.into(), ErrorKind::NotFound),
            (
                ClusterError::DuplicateJoinCode("X".to_owned()).into(),
                ErrorKind::Conflict,
            ),
            (
                ClusterError::Snapshot(SnapshotError::InvalidVersion(9)).into(),
                ErrorKind::InvalidVersion,
            ),
            (Error::InvalidJoinCode(String::new()), ErrorKind::InvalidInput),
            (Error::Timeout, ErrorKind::Timeout),
            (Error::Unavailable, ErrorKind::Unavailable),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{error}");
        }
    }
}
