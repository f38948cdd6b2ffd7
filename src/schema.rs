//! # Postgres Schema for the Leaderboard
//!
//! This module holds the DDL for the one table the core owns, the index that
//! makes its queries cheap, and the trigger that turns every committed change
//! into a `pg_notify` payload on the change channel.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  scores                                                             │
//! │  ┌───────────────────────────────┐                                  │
//! │  │ player_name  TEXT PK          │   CHECK 1 <= char_length <= 20   │
//! │  │ score        BIGINT           │   CHECK score >= 0               │
//! │  │ updated_at   TIMESTAMPTZ      │                                  │
//! │  └──────────────┬────────────────┘                                  │
//! │                 │ AFTER INSERT / UPDATE / DELETE (row trigger)      │
//! │                 ▼                                                   │
//! │  notify_score_change() ──► pg_notify('scores_changes', json)        │
//! │                                                                     │
//! │  idx_scores_leaderboard ON scores (score DESC, player_name ASC)     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why a Trigger?
//!
//! The change channel must reflect *committed* state, including writes that
//! bypass this crate (admin consoles, psql). A row trigger at the storage
//! layer is the only vantage point that sees them all. `pg_notify` delivers
//! after commit on the notifying transaction, so a consumer that re-reads
//! observes the committed row or something newer.
//!
//! ## Emission Rule
//!
//! - INSERT and DELETE always notify.
//! - UPDATE notifies whenever the score actually changed
//!   (`NEW.score IS DISTINCT FROM OLD.score`) - decreases included, so
//!   out-of-band admin corrections propagate to live subscribers.
//! - An UPDATE that leaves the score unchanged stays silent; subscribers
//!   never see no-op churn.

use sqlx::PgPool;

use crate::error::Result;

// =============================================================================
// Channel
// =============================================================================

/// The notification channel the trigger publishes on and the change listener
/// LISTENs to.
pub const SCORES_CHANNEL: &str = "scores_changes";

// =============================================================================
// DDL Statements
// =============================================================================

/// The `scores` table: one row per player, best score wins.
///
/// The CHECK constraints are the storage-layer half of the validation story;
/// [`crate::types::PlayerName`] and [`crate::types::Score`] are the
/// application-layer half. Both enforce the same bounds.
const CREATE_SCORES: &str = r#"
CREATE TABLE IF NOT EXISTS scores (
    player_name TEXT PRIMARY KEY,
    score       BIGINT NOT NULL CHECK (score >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT player_name_length
        CHECK (char_length(player_name) >= 1 AND char_length(player_name) <= 20)
)
"#;

/// The leaderboard index on `(score DESC, player_name ASC)`.
///
/// Matches the global ordering rule exactly, so `GetTop` is an index scan
/// linear in `limit + offset`, and the rank count walks only the rows that
/// rank better than the probe.
const CREATE_LEADERBOARD_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_scores_leaderboard
ON scores (score DESC, player_name ASC)
"#;

/// The trigger function serializing row changes into notification payloads.
const CREATE_NOTIFY_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION notify_score_change()
RETURNS TRIGGER AS $$
DECLARE
    payload JSON;
BEGIN
    IF TG_OP = 'DELETE' THEN
        payload := json_build_object(
            'player_name', OLD.player_name,
            'score', OLD.score,
            'op', 'delete'
        );
        PERFORM pg_notify('scores_changes', payload::text);
        RETURN OLD;
    ELSIF TG_OP = 'INSERT' THEN
        payload := json_build_object(
            'player_name', NEW.player_name,
            'score', NEW.score,
            'op', 'insert'
        );
        PERFORM pg_notify('scores_changes', payload::text);
        RETURN NEW;
    ELSIF TG_OP = 'UPDATE' THEN
        IF NEW.score IS DISTINCT FROM OLD.score THEN
            payload := json_build_object(
                'player_name', NEW.player_name,
                'score', NEW.score,
                'op', 'update'
            );
            PERFORM pg_notify('scores_changes', payload::text);
        END IF;
        RETURN NEW;
    END IF;
    RETURN NULL;
END;
$$ LANGUAGE plpgsql
"#;

/// Dropped and recreated so [`ensure_schema`] stays idempotent on Postgres
/// versions without `CREATE OR REPLACE TRIGGER`.
const DROP_CHANGE_TRIGGER: &str = r#"
DROP TRIGGER IF EXISTS scores_change_trigger ON scores
"#;

const CREATE_CHANGE_TRIGGER: &str = r#"
CREATE TRIGGER scores_change_trigger
AFTER INSERT OR UPDATE OR DELETE ON scores
FOR EACH ROW
EXECUTE FUNCTION notify_score_change()
"#;

// =============================================================================
// Initialization
// =============================================================================

/// Applies the schema idempotently.
///
/// A convenience for development and tests; deployments with their own
/// migration runner can apply [`ddl_statements`] through it instead.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in ddl_statements() {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("schema ensured");
    Ok(())
}

/// The DDL statements in application order.
pub fn ddl_statements() -> [&'static str; 5] {
    [
        CREATE_SCORES,
        CREATE_LEADERBOARD_INDEX,
        CREATE_NOTIFY_FUNCTION,
        DROP_CHANGE_TRIGGER,
        CREATE_CHANGE_TRIGGER,
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// The DDL is data as far as this crate is concerned; keep its
    /// load-bearing fragments pinned so refactors can't silently change the
    /// storage contract.
    #[test]
    fn ddl_carries_constraints_and_order() {
        let table = ddl_statements()[0];
        assert!(table.contains("CHECK (score >= 0)"));
        assert!(table.contains("char_length(player_name) >= 1"));
        assert!(table.contains("char_length(player_name) <= 20"));

        let index = ddl_statements()[1];
        assert!(index.contains("score DESC, player_name ASC"));
    }

    #[test]
    fn trigger_notifies_on_any_score_change() {
        let function = ddl_statements()[2];
        // The update arm must fire on decreases too, not just improvements.
        assert!(function.contains("NEW.score IS DISTINCT FROM OLD.score"));
        assert!(function.contains("pg_notify('scores_changes'"));
    }

    #[test]
    fn channel_name_matches_trigger() {
        let function = ddl_statements()[2];
        assert!(function.contains(SCORES_CHANNEL));
    }
}
