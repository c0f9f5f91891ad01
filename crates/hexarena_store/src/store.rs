use std::str::FromStr;
use std::time::Duration;

use hexarena_session::{Session, SessionStatus, UserId};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::{self, SnapshotError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("stored session id {0:?} is not a UUID")]
    MalformedId(String),
    #[error("stored status {0:?} is not a session status")]
    UnknownStatus(String),
}

/// One row of the durable summary table.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub join_code: String,
    pub status: SessionStatus,
    pub latest_round: i64,
    pub snapshot: Value,
    pub updated_at: OffsetDateTime,
}

impl SessionSummary {
    /// Decodes the stored snapshot, upgrading it to the current schema.
    pub fn decode_snapshot(&self) -> Result<Session, SnapshotError> {
        snapshot::decode(self.snapshot.clone())
    }
}

/// A row of the "active sessions for user" read path.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ActiveSessionRow {
    pub session_id: Uuid,
    pub join_code: String,
    pub latest_round: i64,
}

/// The authoritative on-disk store of session snapshots and their indexes.
///
/// One summary row exists per session; it is rewritten in a single
/// transaction at every round boundary together with the session's
/// `user_session` rows. Between boundaries the in-memory session owned by the
/// runtime is authoritative.
#[derive(Clone, Debug)]
pub struct SummaryStore {
    pool: SqlitePool,
}

impl SummaryStore {
    /// Opens (creating if missing) the database at `url` and runs pending
    /// schema migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Upserts the session's summary and replaces its per-user rows, all in
    /// one transaction.
    pub async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let snapshot = snapshot::encode(session)?.to_string();
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO session_summary \
                 (session_id, join_code, status, latest_round, snapshot, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT (session_id) DO UPDATE SET \
                 join_code = excluded.join_code, \
                 status = excluded.status, \
                 latest_round = excluded.latest_round, \
                 snapshot = excluded.snapshot, \
                 updated_at = excluded.updated_at",
        )
        .bind(session.id.to_string())
        .bind(&session.join_code)
        .bind(status_to_str(session.status))
        .bind(session.round)
        .bind(snapshot)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM user_session WHERE session_id = ?1")
            .bind(session.id.to_string())
            .execute(&mut *tx)
            .await?;

        for player in session.players.values() {
            sqlx::query(
                "INSERT INTO user_session (session_id, user_id, player_status) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(session.id.to_string())
            .bind(player.user_id.0)
            .bind(session.liveness(player.user_id).to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            session_id = %session.id,
            round = session.round,
            "persisted session summary"
        );

        Ok(())
    }

    pub async fn by_id(&self, session_id: Uuid) -> Result<Option<SessionSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, join_code, status, latest_round, snapshot, updated_at \
             FROM session_summary WHERE session_id = ?1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_summary).transpose()
    }

    pub async fn by_join_code(&self, join_code: &str) -> Result<Option<SessionSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, join_code, status, latest_round, snapshot, updated_at \
             FROM session_summary WHERE join_code = ?1",
        )
        .bind(join_code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_summary).transpose()
    }

    /// Every active session the user participates in, most recently updated
    /// first.
    pub async fn active_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ActiveSessionRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.session_id, s.join_code, s.latest_round \
             FROM session_summary s \
             JOIN user_session u ON u.session_id = s.session_id \
             WHERE u.user_id = ?1 AND s.status = 'active' \
             ORDER BY s.updated_at DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_id: String = row.try_get("session_id")?;

                Ok(ActiveSessionRow {
                    session_id: parse_session_id(&raw_id)?,
                    join_code: row.try_get("join_code")?,
                    latest_round: row.try_get("latest_round")?,
                })
            })
            .collect()
    }

    /// Every active session in the store, used by the recovery sweep.
    pub async fn all_active(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, join_code, status, latest_round, snapshot, updated_at \
             FROM session_summary WHERE status = 'active'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_summary).collect()
    }
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Concluded => "concluded",
    }
}

fn parse_session_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::MalformedId(raw.to_owned()))
}

fn decode_summary(row: SqliteRow) -> Result<SessionSummary, StoreError> {
    let raw_id: String = row.try_get("session_id")?;
    let raw_status: String = row.try_get("status")?;
    let raw_snapshot: String = row.try_get("snapshot")?;

    let status = match raw_status.as_str() {
        "active" => SessionStatus::Active,
        "concluded" => SessionStatus::Concluded,
        _ => return Err(StoreError::UnknownStatus(raw_status)),
    };

    let snapshot = serde_json::from_str(&raw_snapshot)
        .map_err(|e| StoreError::Snapshot(SnapshotError::BadSchema(e.to_string())))?;

    Ok(SessionSummary {
        session_id: parse_session_id(&raw_id)?,
        join_code: row.try_get("join_code")?,
        status,
        latest_round: row.try_get("latest_round")?,
        snapshot,
        updated_at: row.try_get("updated_at")?,
    })
}
