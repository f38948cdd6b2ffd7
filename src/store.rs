//! # Store Contract
//!
//! The persistence seam of the crate. Everything above this trait - service,
//! listener, broadcaster, subscriptions - is storage-agnostic; everything
//! below it ([`crate::postgres::PgScoreStore`], [`crate::memory::MemoryScoreStore`])
//! implements the same contract, so the full streaming pipeline runs in tests
//! without a database.
//!
//! ## Contract Summary
//!
//! - [`upsert`](ScoreStore::upsert) is the *best-score* upsert: a missing row
//!   is inserted; an existing row keeps `max(new, existing)`. Atomic per
//!   player with respect to concurrent writers.
//! - [`top`](ScoreStore::top) and [`rank`](ScoreStore::rank) follow the
//!   global ordering rule `score DESC, player ASC`; rank is 1-based and
//!   dense, ties broken lexicographically.
//! - Every committed mutation that changes state is visible on the store's
//!   change channel *after* commit (the trigger in Postgres, the broadcast
//!   feed in memory). The store never notifies for no-op writes.
//!
//! Implementations receive already-validated [`PlayerName`] / [`Score`]
//! values; the service layer owns input validation.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PlayerName, Score, ScoreEntry};

// =============================================================================
// Upsert Outcome
// =============================================================================

/// The result of a best-score upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The committed row. Its score is authoritative: the store computes it
    /// as `max(submitted, existing)`, so it may exceed what was submitted.
    pub entry: ScoreEntry,

    /// Whether the submission moved the stored value: true iff there was no
    /// prior row, or the submitted score beat the prior one.
    pub applied: bool,
}

// =============================================================================
// Store Trait
// =============================================================================

/// Durable storage of `PlayerName -> ScoreEntry` with atomic best-score
/// upsert.
///
/// Object-safe (`Arc<dyn ScoreStore>`) so the service can be constructed
/// over either backend at runtime.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Inserts the player's score, or raises an existing row to
    /// `max(score, existing)`.
    ///
    /// `updated_at` advances only when the stored value actually rises.
    /// Submitting a score at or below the current one returns the unchanged
    /// row with `applied = false`.
    async fn upsert(&self, player: &PlayerName, score: Score) -> Result<UpsertOutcome>;

    /// Fetches a single player's entry.
    async fn get(&self, player: &PlayerName) -> Result<Option<ScoreEntry>>;

    /// Returns up to `limit` entries starting at `offset`, in the global
    /// order `score DESC, player ASC`.
    ///
    /// Callers pass already-clamped values (`1 <= limit <= MAX_LIMIT`,
    /// `offset >= 0`); the service layer owns that policy.
    async fn top(&self, limit: i64, offset: i64) -> Result<Vec<ScoreEntry>>;

    /// The player's 1-based rank:
    /// `1 + |{q : q.score > p.score or (q.score = p.score and q.player < p.player)}|`.
    ///
    /// Returns `None` for an absent player. Ties share the score but not the
    /// rank; the lexicographic tiebreak keeps ranks dense and deterministic.
    async fn rank(&self, player: &PlayerName) -> Result<Option<i64>>;

    /// Removes the player's entry. Returns whether a row existed.
    async fn delete(&self, player: &PlayerName) -> Result<bool>;
}
