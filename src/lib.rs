//! # scorestack - Real-Time Leaderboard Core
//!
//! scorestack is the core of a real-time leaderboard service. Clients submit
//! per-player scores and subscribe to live updates; the crate maintains a
//! persistent, ordered table of best-per-player scores and pushes changes to
//! all subscribers with low latency.
//!
//! ## Architecture Overview
//!
//! ```text
//! write path
//! ┌─────────┐   SubmitScore    ┌───────────┐   best-score upsert   ┌──────────┐
//! │ Client  │ ───────────────► │  Service  │ ────────────────────► │  Store   │
//! └─────────┘                  └───────────┘                       │(Postgres)│
//!                                                                  └────┬─────┘
//!                                                        trigger ──────►│ NOTIFY
//! read path                                                             ▼
//! ┌─────────┐    Update     ┌──────────────┐   ChangeEvent   ┌────────────────┐
//! │ Client  │ ◄──mailbox─── │  Broadcaster │ ◄────events──── │ ChangeListener │
//! └─────────┘               └──────────────┘                 │ (LISTEN + back │
//!      ▲                                                     │  off reconnect)│
//!      │ snapshot (once, before deltas)                      └────────────────┘
//!      └──────────────── Service.top(K) ◄─── Subscription
//! ```
//!
//! One task runs the change listener, one runs the broadcaster, and one runs
//! per live subscription; unary operations execute on request-scoped tasks.
//! A single database notification stream becomes N per-subscriber ordered
//! update streams, with backpressure, reconnection, and snapshot/delta
//! consistency.
//!
//! ## Core Invariants
//!
//! 1. **Best score wins**: the stored value is always `max(submitted, existing)`;
//!    `updated_at` moves only when the value rises via upsert.
//! 2. **One order everywhere**: `score DESC, player ASC` - in the index, the
//!    queries, the snapshot, and any client-side re-sort.
//! 3. **Post-commit notifications only**: a consumer that re-reads after a
//!    notification observes the committed state or something newer; no-op
//!    writes never notify.
//! 4. **Per-player delivery order = commit order** for any single
//!    subscription (one LISTEN connection, one events stream, one fan-out
//!    loop).
//! 5. **The hub never blocks on a slow subscriber**: full mailboxes drop
//!    (counted per subscriber); reconnect + fresh snapshot is the recovery
//!    path.
//!
//! ## Module Organization
//!
//! - [`error`]: the crate-wide error enum and `Result` alias
//! - [`types`]: domain types (names, scores, entries, change events, updates)
//! - [`config`]: environment configuration + component tunables
//! - [`telemetry`]: tracing subscriber setup
//! - [`schema`]: Postgres DDL - table, leaderboard index, notify trigger
//! - [`store`]: the `ScoreStore` contract
//! - [`postgres`]: production store + LISTEN source over sqlx
//! - [`memory`]: in-memory store + change feed for tests and embedding
//! - [`listener`]: the change listener (reconnect state machine)
//! - [`broadcast`]: the fan-out hub and subscriber mailboxes
//! - [`service`]: validation, clamping, best-score façade
//! - [`subscription`]: per-client streaming sessions
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use scorestack::{
//!     Broadcaster, ChangeListener, Config, Leaderboard, PgNotifySource, PgScoreStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> scorestack::Result<()> {
//!     let cfg = Config::from_env()?;
//!     scorestack::telemetry::init(&cfg.log_level);
//!
//!     let pool = scorestack::postgres::connect_pool(&cfg.database_url, cfg.connect_timeout).await?;
//!     scorestack::schema::ensure_schema(&pool).await?;
//!
//!     let service = Leaderboard::with_limits(
//!         Arc::new(PgScoreStore::new(pool)),
//!         cfg.default_limit,
//!         cfg.max_limit,
//!     );
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let source = PgNotifySource::new(&cfg.database_url, &cfg.listener.channel);
//!     let listener = ChangeListener::spawn(source, cfg.listener.clone(), shutdown_rx);
//!
//!     let hub = Broadcaster::new(cfg.broadcaster.clone());
//!     tokio::spawn(hub.clone().run(listener.events));
//!
//!     // Hand `service` and `hub` to the transport layer; each streaming
//!     // session builds a StreamSession from them.
//!     // ...
//!     let _ = shutdown_tx;
//!     Ok(())
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for all failure modes.
pub mod error;

/// Domain types: players, scores, entries, change events, updates.
pub mod types;

/// Environment configuration and component tunables.
pub mod config;

/// Logging setup (tracing subscriber installation).
pub mod telemetry;

/// Postgres DDL and schema initialization.
pub mod schema;

/// The storage contract ([`store::ScoreStore`]).
pub mod store;

/// Postgres-backed store and LISTEN notify source.
pub mod postgres;

/// In-memory store with a trigger-equivalent change feed.
pub mod memory;

/// The change listener: notification consumption with backoff reconnect.
pub mod listener;

/// The broadcaster: single-reader/multi-writer fan-out hub.
pub mod broadcast;

/// The leaderboard service façade.
pub mod service;

/// Per-client streaming sessions.
pub mod subscription;

// =============================================================================
// Re-exports
// =============================================================================

pub use broadcast::{Broadcaster, Mailbox, SubscriberId};
pub use config::{BroadcasterConfig, Config, ListenerConfig};
pub use error::{Error, Result};
pub use listener::{Backoff, ChangeListener, ListenerHandle, NotifyConnection, NotifySource};
pub use memory::{MemoryNotifySource, MemoryScoreStore};
pub use postgres::{PgNotifySource, PgScoreStore};
pub use service::{Leaderboard, RankedEntry};
pub use store::{ScoreStore, UpsertOutcome};
pub use subscription::{ChannelSink, StreamSession, SubscriptionState, UpdateSink};

pub use types::{
    ChangeEvent, ChangeOp, PlayerName, Score, ScoreEntry, Update, UpdateKind, DEFAULT_LIMIT,
    MAX_LIMIT,
};
