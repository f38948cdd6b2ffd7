//! # Error Handling
//!
//! A single crate-wide error enum ([`Error`]) plus a [`Result`] alias. One
//! enum keeps function signatures short and lets callers handle failures
//! uniformly; the variants follow the error table of the design:
//!
//! | Variant | Source | Propagation |
//! |---|---|---|
//! | `InvalidArgument` | bad name/score/limit before clamping | synchronous, to the caller |
//! | `PlayerNotFound` | rank lookup on an absent player | structured result, transports map to `not_found` |
//! | `Db` | any storage failure | logged with context, opaque internal error upstream |
//! | `Listener` | connect/LISTEN/read failure in the change listener | never surfaced to clients; goes to the listener's error stream and triggers backoff |
//! | `MalformedPayload` | unparseable or invalid change notification | error stream; the connection stays up |
//! | `Delivery` | a peer send failed mid-stream | ends that subscription only |
//! | `Internal` | everything else | logged, opaque upstream |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors the leaderboard core can produce.
///
/// `sqlx::Error` converts automatically via `#[from]`, so store code can use
/// `?` directly on query results.
#[derive(Error, Debug)]
pub enum Error {
    /// Input validation failed: empty or overlong player name, negative
    /// score, or a non-positive limit where one is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested player has no score entry.
    ///
    /// Not a wire error: transports turn this into a structured
    /// `not_found = true` response.
    #[error("player '{player}' not found")]
    PlayerNotFound {
        /// The name that was looked up.
        player: String,
    },

    /// The persistent store failed.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// The change listener failed to acquire, subscribe, or read its
    /// connection. Recovered internally with backoff; observable only on
    /// the listener's error stream.
    #[error("change listener: {0}")]
    Listener(String),

    /// A change notification payload could not be parsed or failed domain
    /// validation. The offending payload is dropped; the connection is kept.
    #[error("malformed change payload: {0}")]
    MalformedPayload(String),

    /// Sending an update to a streaming peer failed (disconnect, broken
    /// pipe). Ends that subscription.
    #[error("update delivery failed: {0}")]
    Delivery(String),

    /// An internal invariant was violated or a component shut down under a
    /// caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors callers caused (as opposed to infrastructure faults).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// True when the error is the structured "no such player" result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PlayerNotFound { .. })
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` alias using [`Error`], the standard library-crate pattern.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
