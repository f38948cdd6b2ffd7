//! # Postgres Store
//!
//! The production [`ScoreStore`] over `sqlx`, plus the [`NotifySource`]
//! implementation that LISTENs on the change channel.
//!
//! ## Query Strategy
//!
//! Runtime-bound queries (`sqlx::query_as` / `query_scalar`), not the
//! compile-checked macros: the crate must build without a reachable
//! database. The row shapes are pinned by [`ScoreRow`] and covered by the
//! store contract tests against the in-memory implementation.
//!
//! ## The Upsert
//!
//! Best-score-wins in a single statement:
//!
//! ```text
//! WITH prior     AS (read the existing score)
//!      committed AS (INSERT .. ON CONFLICT DO UPDATE
//!                    SET score = GREATEST(old, new),
//!                        updated_at = now() only when the score rises)
//! SELECT committed row + applied (no prior row OR new > prior)
//! ```
//!
//! One statement means one snapshot: the prior read, the merge, and the
//! `applied` computation can't interleave with another writer on the same
//! player. The trigger (see [`crate::schema`]) fires on the same commit, so
//! the change channel only ever reports committed state.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::error::{Error, Result};
use crate::listener::{NotifyConnection, NotifySource};
use crate::store::{ScoreStore, UpsertOutcome};
use crate::types::{PlayerName, Score, ScoreEntry};

// =============================================================================
// Pool
// =============================================================================

/// Pool sizing: enough for request concurrency without starving the
/// dedicated LISTEN connection, which is acquired outside the pool.
const MAX_CONNECTIONS: u32 = 25;
const MIN_CONNECTIONS: u32 = 5;

/// Builds and verifies the connection pool.
///
/// Failure here is fatal by design: a process that cannot reach its store at
/// startup has nothing to serve. After startup, connectivity loss is handled
/// with retries (pool re-acquisition for queries, backoff in the change
/// listener).
pub async fn connect_pool(database_url: &str, connect_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(MIN_CONNECTIONS)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await?;

    // Round-trip once so a bad URL fails now, not on the first request.
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!(max = MAX_CONNECTIONS, min = MIN_CONNECTIONS, "database pool ready");
    Ok(pool)
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Direct mapping of the `scores` table row.
#[derive(Debug, Clone, FromRow)]
struct ScoreRow {
    player_name: String,
    score: i64,
    updated_at: DateTime<Utc>,
}

impl ScoreRow {
    /// Converts a database row into the domain entry.
    ///
    /// The CHECK constraints guarantee the row satisfies the domain
    /// invariants, but rows are still run through `PlayerName::parse` so a
    /// constraint drift surfaces as an error instead of an invalid value.
    fn into_entry(self) -> Result<ScoreEntry> {
        let player = PlayerName::parse(self.player_name)
            .map_err(|e| Error::Internal(format!("invalid row in scores table: {}", e)))?;
        Ok(ScoreEntry {
            player,
            score: Score::from_db(self.score),
            updated_at: self.updated_at,
        })
    }
}

/// Upsert result row: the committed entry plus the applied flag.
#[derive(Debug, Clone, FromRow)]
struct UpsertRow {
    player_name: String,
    score: i64,
    updated_at: DateTime<Utc>,
    applied: bool,
}

// =============================================================================
// SQL
// =============================================================================

const UPSERT_SQL: &str = r#"
WITH prior AS (
    SELECT score FROM scores WHERE player_name = $1
), committed AS (
    INSERT INTO scores (player_name, score)
    VALUES ($1, $2)
    ON CONFLICT (player_name) DO UPDATE
        SET score = GREATEST(scores.score, EXCLUDED.score),
            updated_at = CASE
                WHEN EXCLUDED.score > scores.score THEN now()
                ELSE scores.updated_at
            END
    RETURNING player_name, score, updated_at
)
SELECT c.player_name,
       c.score,
       c.updated_at,
       (NOT EXISTS (SELECT 1 FROM prior)
        OR $2 > (SELECT score FROM prior)) AS applied
FROM committed c
"#;

const GET_SQL: &str = r#"
SELECT player_name, score, updated_at
FROM scores
WHERE player_name = $1
"#;

const TOP_SQL: &str = r#"
SELECT player_name, score, updated_at
FROM scores
ORDER BY score DESC, player_name ASC
LIMIT $1 OFFSET $2
"#;

/// 1-based dense rank with the lexicographic tiebreak. The correlated count
/// walks the leaderboard index only over rows that rank better.
const RANK_SQL: &str = r#"
SELECT (
    SELECT COUNT(*) + 1
    FROM scores q
    WHERE q.score > p.score
       OR (q.score = p.score AND q.player_name < p.player_name)
)
FROM scores p
WHERE p.player_name = $1
"#;

const DELETE_SQL: &str = r#"
DELETE FROM scores WHERE player_name = $1
"#;

// =============================================================================
// Store
// =============================================================================

/// [`ScoreStore`] backed by Postgres.
#[derive(Clone)]
pub struct PgScoreStore {
    pool: PgPool,
}

impl PgScoreStore {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for admin tooling and schema setup.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ScoreStore for PgScoreStore {
    async fn upsert(&self, player: &PlayerName, score: Score) -> Result<UpsertOutcome> {
        let row: UpsertRow = sqlx::query_as(UPSERT_SQL)
            .bind(player.as_str())
            .bind(score.as_i64())
            .fetch_one(&self.pool)
            .await?;

        let applied = row.applied;
        let entry = ScoreRow {
            player_name: row.player_name,
            score: row.score,
            updated_at: row.updated_at,
        }
        .into_entry()?;

        Ok(UpsertOutcome { entry, applied })
    }

    async fn get(&self, player: &PlayerName) -> Result<Option<ScoreEntry>> {
        let row: Option<ScoreRow> = sqlx::query_as(GET_SQL)
            .bind(player.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScoreRow::into_entry).transpose()
    }

    async fn top(&self, limit: i64, offset: i64) -> Result<Vec<ScoreEntry>> {
        let rows: Vec<ScoreRow> = sqlx::query_as(TOP_SQL)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ScoreRow::into_entry).collect()
    }

    async fn rank(&self, player: &PlayerName) -> Result<Option<i64>> {
        let rank: Option<i64> = sqlx::query_scalar(RANK_SQL)
            .bind(player.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(rank)
    }

    async fn delete(&self, player: &PlayerName) -> Result<bool> {
        let result = sqlx::query(DELETE_SQL)
            .bind(player.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Notify Source
// =============================================================================

/// [`NotifySource`] over a dedicated `PgListener` connection.
///
/// Each `connect` call opens a fresh listener and issues `LISTEN`; the
/// change listener owns when to reconnect. The connection is separate from
/// the query pool so slow queries can never starve notification delivery.
#[derive(Clone)]
pub struct PgNotifySource {
    database_url: String,
    channel: String,
}

impl PgNotifySource {
    /// Creates a source for the given channel.
    pub fn new(database_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl NotifySource for PgNotifySource {
    type Conn = PgNotifyConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|e| Error::Listener(format!("acquire connection: {}", e)))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::Listener(format!("LISTEN {}: {}", self.channel, e)))?;
        Ok(PgNotifyConnection { listener })
    }
}

/// One live LISTEN subscription.
pub struct PgNotifyConnection {
    listener: PgListener,
}

#[async_trait]
impl NotifyConnection for PgNotifyConnection {
    async fn recv(&mut self) -> Result<String> {
        let notification = self
            .listener
            .recv()
            .await
            .map_err(|e| Error::Listener(format!("wait for notification: {}", e)))?;
        Ok(notification.payload().to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
