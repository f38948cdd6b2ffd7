//! # Broadcaster
//!
//! The fan-out hub: one reader of the change listener's events stream,
//! many writers into per-subscriber mailboxes.
//!
//! ```text
//! ┌──────────────┐      ┌─────────────────────────────────────────────┐
//! │ ChangeSource │      │                Broadcaster                  │
//! │   events ────┼─────►│  map op -> kind, stamp now()                │
//! └──────────────┘      │              │                              │
//!                       │              ▼  try_send (never blocks)     │
//!                       │  ┌────────┐ ┌────────┐ ┌────────┐           │
//!                       │  │mailbox │ │mailbox │ │mailbox │  ...      │
//!                       │  └───┬────┘ └───┬────┘ └───┬────┘           │
//!                       └──────┼──────────┼──────────┼────────────────┘
//!                              ▼          ▼          ▼
//!                         Subscription  Subscription  Subscription
//! ```
//!
//! ## The Central Tradeoff: Hub Liveness over Per-Subscriber Completeness
//!
//! Every mailbox enqueue is a `try_send`. A subscriber that cannot keep up
//! loses updates (counted on its drop counter, never surfaced as an error)
//! and cannot slow down the loop or any other subscriber. Slow subscribers
//! recover by reconnecting for a fresh snapshot. The alternative - blocking
//! on the slowest mailbox - would let one stalled client freeze the fan-out
//! for everyone.
//!
//! ## Concurrency Discipline
//!
//! The subscriber registry is the only shared mutable structure. It sits
//! behind a `std::sync::RwLock`: broadcast takes the read lock (updates are
//! immutable once built, and `try_send` never blocks, so holding the read
//! lock across the fan-out is safe), add/remove take the write lock briefly.
//! The lock is never held across an await.
//!
//! ## No Back-Pointer Cycles
//!
//! The broadcaster holds mailbox senders; a [`Mailbox`] holds only a `Weak`
//! handle to the registry for unregistering itself on drop. If the
//! broadcaster is already gone, the upgrade fails and drop is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BroadcasterConfig;
use crate::types::{ChangeEvent, ChangeOp, ScoreEntry, Update};

// =============================================================================
// Subscriber Identity
// =============================================================================

/// Opaque id for a registered mailbox, used for id-based unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Send side of one subscriber: the mailbox sender plus its drop counter.
struct SubscriberSlot {
    updates: mpsc::Sender<Update>,
    dropped: Arc<AtomicU64>,
}

struct Registry {
    subscribers: RwLock<HashMap<SubscriberId, SubscriberSlot>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
    mailbox_capacity: usize,
}

impl Registry {
    fn remove(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().expect("subscriber registry poisoned");
        if subscribers.remove(&id).is_some() {
            debug!(subscriber = %id, remaining = subscribers.len(), "subscriber removed");
        }
    }
}

// =============================================================================
// Mailbox
// =============================================================================

/// Receive side of one subscription: a bounded FIFO written only by the
/// broadcaster, read only by its subscription.
///
/// Dropping the mailbox unregisters it; updates still queued are discarded.
pub struct Mailbox {
    id: SubscriberId,
    updates: mpsc::Receiver<Update>,
    dropped: Arc<AtomicU64>,
    registry: Weak<Registry>,
}

impl Mailbox {
    /// Awaits the next update. `None` means the broadcaster closed this
    /// mailbox (hub shutdown).
    pub async fn recv(&mut self) -> Option<Update> {
        self.updates.recv().await
    }

    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// How many updates were dropped because this mailbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// A mailbox is also a [`Stream`] of updates, so consumers can use stream
/// combinators instead of a hand-written recv loop.
///
/// [`Stream`]: futures::Stream
impl futures::Stream for Mailbox {
    type Item = Update;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Update>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// The fan-out hub. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

impl Broadcaster {
    /// Creates a hub with the given mailbox depth.
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            inner: Arc::new(Registry {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped_total: AtomicU64::new(0),
                mailbox_capacity: config.mailbox_capacity,
            }),
        }
    }

    /// Registers a new subscriber and returns its mailbox.
    pub fn subscribe(&self) -> Mailbox {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.mailbox_capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .expect("subscriber registry poisoned");
        subscribers.insert(
            id,
            SubscriberSlot {
                updates: tx,
                dropped: Arc::clone(&dropped),
            },
        );
        debug!(subscriber = %id, total = subscribers.len(), "subscriber added");
        drop(subscribers);

        Mailbox {
            id,
            updates: rx,
            dropped,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .expect("subscriber registry poisoned")
            .len()
    }

    /// Total updates dropped across all subscribers since creation.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    /// The fan-out loop: reads the events stream until it closes, then
    /// closes every remaining mailbox and returns.
    pub async fn run(self, mut events: mpsc::Receiver<ChangeEvent>) {
        info!("broadcaster starting");

        while let Some(event) = events.recv().await {
            let Some(update) = map_event(event) else {
                continue;
            };
            self.dispatch(update);
        }

        // Events stream closed: the listener shut down. Drain the registry
        // so every subscription sees its mailbox close and exits cleanly.
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .expect("subscriber registry poisoned");
        let remaining = subscribers.len();
        subscribers.clear();
        info!(closed = remaining, "broadcaster shutting down");
    }

    /// Delivers one update to every mailbox, never blocking.
    fn dispatch(&self, update: Update) {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .expect("subscriber registry poisoned");

        for (id, slot) in subscribers.iter() {
            match slot.updates.try_send(update.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = %id, "mailbox full, dropping update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // The mailbox was dropped; its Drop impl removes the
                    // slot. Nothing to do here.
                }
            }
        }
    }
}

/// Maps a change event to the update subscribers see.
///
/// `insert` and `update` both become `Upsert` - subscribers reconcile by
/// player and don't care which one it was. Unknown operations are skipped
/// with a warning; a newer schema must not wedge an older hub.
///
/// The timestamp is broadcast time: the notification does not carry the
/// commit timestamp, and within one player's stream delivery order is the
/// authoritative order anyway.
fn map_event(event: ChangeEvent) -> Option<Update> {
    let entry = ScoreEntry {
        player: event.player,
        score: event.score,
        updated_at: Utc::now(),
    };

    match event.op {
        ChangeOp::Insert | ChangeOp::Update => Some(Update::Upsert { changed: entry }),
        ChangeOp::Delete => Some(Update::Delete { changed: entry }),
        ChangeOp::Unknown => {
            warn!(player = %entry.player, "unknown change operation, skipping");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
