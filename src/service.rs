//! # Leaderboard Service
//!
//! The validation-and-policy façade over the store: input validation, limit
//! clamping, and the best-score rule's caller-facing shape. Transports call
//! this; nothing below it re-validates.
//!
//! The service is stateless and does no concurrency coordination of its own -
//! the store's per-player atomicity is the only synchronization the write
//! path needs. `Leaderboard` is `Clone` and is handed to each transport
//! session explicitly (no ambient globals).
//!
//! Caller deadlines are the transport's job: wrap a unary call in
//! `tokio::time::timeout` (or drop the future) and it stops at its next
//! suspension point without partial state - the store commits atomically or
//! not at all.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{ScoreStore, UpsertOutcome};
use crate::types::{PlayerName, Score, ScoreEntry, DEFAULT_LIMIT, MAX_LIMIT};

// =============================================================================
// Results
// =============================================================================

/// A rank lookup result: the 1-based rank plus the entry it ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    /// 1-based, dense, deterministic (ties broken by player name).
    pub rank: i64,

    /// The ranked entry.
    pub entry: ScoreEntry,
}

// =============================================================================
// Service
// =============================================================================

/// The leaderboard business logic over any [`ScoreStore`].
#[derive(Clone)]
pub struct Leaderboard {
    store: Arc<dyn ScoreStore>,
    default_limit: i64,
    max_limit: i64,
}

impl Leaderboard {
    /// Creates a service with the standard limit policy
    /// (default 10, max 100).
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self::with_limits(store, DEFAULT_LIMIT, MAX_LIMIT)
    }

    /// Creates a service with a custom limit policy.
    ///
    /// Callers are expected to pass validated configuration
    /// (`0 < default_limit <= max_limit`, see [`crate::config::Config`]).
    pub fn with_limits(store: Arc<dyn ScoreStore>, default_limit: i64, max_limit: i64) -> Self {
        Self {
            store,
            default_limit,
            max_limit,
        }
    }

    /// Submits a score; the stored value is `max(submitted, existing)`.
    ///
    /// Returns the committed entry (authoritative score) and whether this
    /// submission moved the value (`applied`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad name or negative score;
    /// [`Error::Db`] when the store fails.
    pub async fn submit_score(&self, player: &str, score: i64) -> Result<UpsertOutcome> {
        let player = PlayerName::parse(player)?;
        let score = Score::new(score)?;

        let outcome = self.store.upsert(&player, score).await?;
        info!(
            player = %outcome.entry.player,
            submitted = %score,
            stored = %outcome.entry.score,
            applied = outcome.applied,
            "score submitted"
        );
        Ok(outcome)
    }

    /// Returns the top of the leaderboard, `score DESC, player ASC`.
    ///
    /// `limit <= 0` means "the default"; anything above the maximum is
    /// clamped down. A negative offset clamps to zero. Out-of-range values
    /// are a normal part of the request surface, so they clamp rather than
    /// error.
    pub async fn top(&self, limit: i64, offset: i64) -> Result<Vec<ScoreEntry>> {
        let limit = self.clamp_limit(limit);
        let offset = offset.max(0);

        debug!(limit, offset, "top query");
        self.store.top(limit, offset).await
    }

    /// Looks up a player's rank and entry.
    ///
    /// # Errors
    ///
    /// [`Error::PlayerNotFound`] when the player has no entry - a
    /// structured result, not an infrastructure failure; transports map it
    /// to `not_found = true`.
    pub async fn rank(&self, player: &str) -> Result<RankedEntry> {
        let player = PlayerName::parse(player)?;

        let entry = self
            .store
            .get(&player)
            .await?
            .ok_or_else(|| Error::PlayerNotFound {
                player: player.as_str().to_string(),
            })?;

        let rank = self
            .store
            .rank(&player)
            .await?
            .ok_or_else(|| Error::PlayerNotFound {
                player: player.as_str().to_string(),
            })?;

        Ok(RankedEntry { rank, entry })
    }

    /// Removes a player's entry. Removing an absent player succeeds.
    pub async fn delete(&self, player: &str) -> Result<()> {
        let player = PlayerName::parse(player)?;

        let existed = self.store.delete(&player).await?;
        info!(player = %player, existed, "score deleted");
        Ok(())
    }

    /// Clamps a requested limit into `[1, max_limit]`, defaulting when
    /// non-positive.
    pub fn clamp_limit(&self, limit: i64) -> i64 {
        if limit <= 0 {
            self.default_limit
        } else {
            limit.min(self.max_limit)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScoreStore;

    fn service() -> Leaderboard {
        Leaderboard::new(Arc::new(MemoryScoreStore::new()))
    }

    #[tokio::test]
    async fn submit_validates_name_boundaries() {
        let svc = service();

        assert!(svc.submit_score("A", 1).await.is_ok());
        assert!(svc.submit_score("12345678901234567890", 1).await.is_ok());

        let empty = svc.submit_score("", 1).await;
        assert!(matches!(empty, Err(Error::InvalidArgument(_))));

        let long = svc.submit_score("123456789012345678901", 1).await;
        assert!(matches!(long, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn submit_validates_score() {
        let svc = service();

        assert!(svc.submit_score("Alice", 0).await.is_ok());
        let negative = svc.submit_score("Alice", -1).await;
        assert!(matches!(negative, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn best_score_wins_sequence() {
        let svc = service();

        let first = svc.submit_score("Alice", 100).await.unwrap();
        assert!(first.applied);
        assert_eq!(first.entry.score.as_i64(), 100);

        let lower = svc.submit_score("Alice", 50).await.unwrap();
        assert!(!lower.applied);
        assert_eq!(lower.entry.score.as_i64(), 100);

        let higher = svc.submit_score("Alice", 200).await.unwrap();
        assert!(higher.applied);
        assert_eq!(higher.entry.score.as_i64(), 200);
    }

    #[tokio::test]
    async fn resubmitting_the_same_score_is_not_applied() {
        let svc = service();

        svc.submit_score("Alice", 100).await.unwrap();
        let again = svc.submit_score("Alice", 100).await.unwrap();
        assert!(!again.applied);
    }

    #[tokio::test]
    async fn limit_clamping_table() {
        let svc = service();

        assert_eq!(svc.clamp_limit(0), 10); // non-positive -> default
        assert_eq!(svc.clamp_limit(-5), 10);
        assert_eq!(svc.clamp_limit(1), 1);
        assert_eq!(svc.clamp_limit(100), 100);
        assert_eq!(svc.clamp_limit(200), 100); // clamp to max
    }

    #[tokio::test]
    async fn top_clamps_negative_offset() {
        let svc = service();
        svc.submit_score("Alice", 10).await.unwrap();

        let entries = svc.top(10, -3).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn rank_for_missing_player_is_structured_not_found() {
        let svc = service();

        let missing = svc.rank("Ghost").await;
        assert!(matches!(missing, Err(Error::PlayerNotFound { .. })));
    }

    #[tokio::test]
    async fn rank_returns_entry_with_rank() {
        let svc = service();
        svc.submit_score("Alice", 500).await.unwrap();
        svc.submit_score("Bob", 900).await.unwrap();

        let ranked = svc.rank("Alice").await.unwrap();
        assert_eq!(ranked.rank, 2);
        assert_eq!(ranked.entry.player.as_str(), "Alice");
        assert_eq!(ranked.entry.score.as_i64(), 500);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let svc = service();
        svc.submit_score("Alice", 100).await.unwrap();

        svc.delete("Alice").await.unwrap();
        assert!(matches!(
            svc.rank("Alice").await,
            Err(Error::PlayerNotFound { .. })
        ));

        // Deleting again still succeeds.
        svc.delete("Alice").await.unwrap();
    }

    #[tokio::test]
    async fn delete_validates_name() {
        let svc = service();
        assert!(matches!(
            svc.delete("").await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
