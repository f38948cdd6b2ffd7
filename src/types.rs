//! # Domain Types for the Leaderboard
//!
//! This module defines the core types used throughout the crate: player
//! identities, scores, leaderboard entries, change notifications, and the
//! updates that flow to streaming subscribers.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the "newtype pattern" for the two values with domain invariants -
//! [`PlayerName`] and [`Score`]. This provides:
//!
//! - **Validation at the boundary**: a `PlayerName` in hand is always 1..=20
//!   characters; a `Score` is always non-negative. Inner code never re-checks.
//! - **Type safety**: can't accidentally pass a raw limit where a score is
//!   expected.
//! - **Self-documenting signatures**: `fn upsert(player: &PlayerName, score: Score)`
//!   says exactly what it accepts.
//!
//! ## Ordering Rule
//!
//! The leaderboard order is `score DESC, player ASC` everywhere: in the SQL
//! `ORDER BY`, in the in-memory store's sort, and in any client-side re-sort
//! of deltas. [`ScoreEntry::order_key`] is the single definition of that rule
//! on the Rust side, so snapshot order and re-sorted delta order can never
//! diverge.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Limits
// =============================================================================

/// Default number of entries returned when a caller passes `limit <= 0`.
pub const DEFAULT_LIMIT: i64 = 10;

/// Upper clamp for `limit` and `initial_limit`.
pub const MAX_LIMIT: i64 = 100;

/// Minimum player name length, in characters.
pub const MIN_PLAYER_NAME_LEN: usize = 1;

/// Maximum player name length, in characters.
///
/// Matches the storage-layer CHECK constraint (`char_length(player_name) <= 20`),
/// so a name that validates here is a name the database will accept.
pub const MAX_PLAYER_NAME_LEN: usize = 20;

// =============================================================================
// Player Identity
// =============================================================================

/// A validated player name: the identity of a score row.
///
/// # Invariant
///
/// Always 1..=20 characters (Unicode scalar values, matching the database's
/// `char_length` CHECK). Construct via [`PlayerName::parse`]; there is no
/// unchecked constructor in the public API, so holding a `PlayerName` is
/// proof of validity.
///
/// # Example
///
/// ```rust
/// use scorestack::types::PlayerName;
///
/// let player = PlayerName::parse("Alice").unwrap();
/// assert_eq!(player.as_str(), "Alice");
///
/// assert!(PlayerName::parse("").is_err());
/// assert!(PlayerName::parse("123456789012345678901").is_err()); // 21 chars
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PlayerName(String);

impl PlayerName {
    /// Parses and validates a player name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the name is empty or longer
    /// than [`MAX_PLAYER_NAME_LEN`] characters.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let len = name.chars().count();
        if !(MIN_PLAYER_NAME_LEN..=MAX_PLAYER_NAME_LEN).contains(&len) {
            return Err(Error::InvalidArgument(format!(
                "player name must be between {} and {} characters, got {}",
                MIN_PLAYER_NAME_LEN, MAX_PLAYER_NAME_LEN, len
            )));
        }
        Ok(Self(name))
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the name, returning the inner `String`.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PlayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Scores
// =============================================================================

/// A non-negative 64-bit score.
///
/// # Invariant
///
/// `>= 0`, mirrored by the storage-layer CHECK (`score >= 0`). The wire and
/// the database both use `i64`, so we wrap `i64` rather than `u64` to avoid
/// lossy conversions at every boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(i64);

impl Score {
    /// The zero score, valid and accepted.
    pub const ZERO: Score = Score(0);

    /// Validates a raw score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for negative values.
    pub fn new(value: i64) -> Result<Self> {
        if value < 0 {
            return Err(Error::InvalidArgument(format!(
                "score must be non-negative, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Creates a score without the sign check.
    ///
    /// For values read back from the database, where the CHECK constraint
    /// already guarantees non-negativity.
    pub fn from_db(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Leaderboard Entries
// =============================================================================

/// One row of the leaderboard: a player's best score and when it last rose.
///
/// `updated_at` serializes as RFC 3339 UTC (chrono's serde default), which is
/// the wire format transports expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    /// The player this entry belongs to.
    pub player: PlayerName,

    /// The best score submitted so far (or the admin-written value).
    pub score: Score,

    /// When the stored score last changed upward via upsert. Admin writes
    /// may set it freely.
    pub updated_at: DateTime<Utc>,
}

impl ScoreEntry {
    /// The global ordering key: `score DESC, player ASC`.
    ///
    /// Sorting ascending by this key yields leaderboard order. Keeping the
    /// rule in one place guarantees the snapshot order and any client-side
    /// re-sort of deltas agree, ties included.
    pub fn order_key(&self) -> (std::cmp::Reverse<i64>, &str) {
        (std::cmp::Reverse(self.score.as_i64()), self.player.as_str())
    }
}

// =============================================================================
// Change Notifications
// =============================================================================

/// The operation reported by a database change notification.
///
/// `Unknown` absorbs payloads from newer schema versions carrying operations
/// this build does not understand; the broadcaster logs and skips them
/// instead of tearing anything down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// A new row was inserted.
    Insert,
    /// An existing row's score changed (in either direction).
    Update,
    /// A row was deleted.
    Delete,
    /// An operation this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
            ChangeOp::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A single committed change, parsed from the notification payload.
///
/// Emitted by the store *after* the commit that caused it. `score` is the
/// post-commit value, or the pre-delete value for deletes. Consumed once by
/// the change listener and forwarded once per live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The affected player.
    pub player: PlayerName,

    /// Post-commit score (pre-delete score for `Delete`).
    pub score: Score,

    /// What happened to the row.
    pub op: ChangeOp,
}

/// The JSON shape the database trigger publishes on the change channel:
/// `{"player_name": .., "score": .., "op": ..}`.
///
/// This is the wire form; [`ChangeEvent`] is the validated in-process form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePayload {
    pub player_name: String,
    pub score: i64,
    pub op: ChangeOp,
}

impl ChangePayload {
    /// Validates the payload into a [`ChangeEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] when the name or score fails
    /// domain validation. The database constraints make this unreachable for
    /// payloads the trigger produced, but the channel is a plain text bus -
    /// anything can publish on it.
    pub fn into_event(self) -> Result<ChangeEvent> {
        let player = PlayerName::parse(self.player_name)
            .map_err(|e| Error::MalformedPayload(format!("bad player_name: {}", e)))?;
        let score = Score::new(self.score)
            .map_err(|e| Error::MalformedPayload(format!("bad score: {}", e)))?;
        Ok(ChangeEvent {
            player,
            score,
            op: self.op,
        })
    }
}

// =============================================================================
// Subscriber Updates
// =============================================================================

/// The kind of an [`Update`], as transports expose it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    Snapshot,
    Upsert,
    Delete,
}

/// One message on a subscriber's stream.
///
/// A subscription emits exactly one `Snapshot` first, then zero or more
/// `Upsert` / `Delete` deltas until it closes.
///
/// # Reconciling Deltas
///
/// Clients must apply deltas onto their snapshot idempotently, matching by
/// player: an `Upsert` replaces the player's entry (inserting if absent), a
/// `Delete` removes it (a no-op if absent). The snapshot is "recent", not a
/// consistent cut - a change landing between the snapshot read and mailbox
/// registration can be missed, and reconnecting with a fresh snapshot is the
/// recovery path.
///
/// # Timestamps
///
/// Delta entries carry the *broadcast* time, not the commit time - the
/// change notification does not include the commit timestamp. Within one
/// player's stream the authoritative order is delivery order; treat
/// `updated_at` as advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Update {
    /// The initial top-K view, in leaderboard order.
    Snapshot { snapshot: Vec<ScoreEntry> },
    /// A player's entry changed (inserted, raised, or admin-written).
    Upsert { changed: ScoreEntry },
    /// A player's entry was removed.
    Delete { changed: ScoreEntry },
}

impl Update {
    /// Returns the update's kind tag.
    pub fn kind(&self) -> UpdateKind {
        match self {
            Update::Snapshot { .. } => UpdateKind::Snapshot,
            Update::Upsert { .. } => UpdateKind::Upsert,
            Update::Delete { .. } => UpdateKind::Delete,
        }
    }

    /// Returns the changed entry for delta updates, `None` for snapshots.
    pub fn changed(&self) -> Option<&ScoreEntry> {
        match self {
            Update::Snapshot { .. } => None,
            Update::Upsert { changed } | Update::Delete { changed } => Some(changed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
