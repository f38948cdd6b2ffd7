//! # In-Memory Store
//!
//! A [`ScoreStore`] over a `BTreeMap`, implementing the same contract as the
//! Postgres store - including the change channel: every mutation publishes
//! the *same JSON payload* the database trigger would, on a
//! `tokio::sync::broadcast` channel that [`MemoryNotifySource`] subscribes
//! to. Tests therefore exercise the full pipeline (store -> payload ->
//! listener -> broadcaster -> subscription) with nothing stubbed out but the
//! network.
//!
//! The emission rule mirrors the trigger: inserts and deletes always notify,
//! updates notify only when the score actually changed (in either
//! direction), and a write that leaves the score unchanged stays silent.
//!
//! [`set_score`](MemoryScoreStore::set_score) force-writes a value outside
//! the best-score rule, modeling out-of-band admin mutations that in
//! production would hit the table directly.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::listener::{NotifyConnection, NotifySource};
use crate::store::{ScoreStore, UpsertOutcome};
use crate::types::{ChangeOp, ChangePayload, PlayerName, Score, ScoreEntry};

/// Change-feed depth. Generous relative to test volumes; a lagged receiver
/// surfaces as a connection error, which the listener treats like any other
/// read failure.
const CHANGE_FEED_CAPACITY: usize = 256;

/// In-memory [`ScoreStore`] with a trigger-equivalent change feed.
pub struct MemoryScoreStore {
    entries: Mutex<BTreeMap<String, ScoreEntry>>,
    changes: broadcast::Sender<String>,
}

impl MemoryScoreStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    /// Returns a [`NotifySource`] over this store's change feed.
    ///
    /// Like LISTEN, a connection only sees notifications published after it
    /// connects.
    pub fn notify_source(&self) -> MemoryNotifySource {
        MemoryNotifySource {
            changes: self.changes.clone(),
        }
    }

    /// Force-writes a player's score, bypassing the best-score rule.
    ///
    /// Models an admin mutation applied directly to the table. Emits
    /// `insert` for a new row, `update` when the score changed (decreases
    /// included), nothing when the written value equals the stored one.
    pub fn set_score(&self, player: &PlayerName, score: Score) -> ScoreEntry {
        let entry = ScoreEntry {
            player: player.clone(),
            score,
            updated_at: Utc::now(),
        };

        let op = {
            let mut entries = self.entries.lock().expect("score map poisoned");
            let prior = entries.insert(player.as_str().to_string(), entry.clone());
            match prior {
                None => Some(ChangeOp::Insert),
                Some(prev) if prev.score != score => Some(ChangeOp::Update),
                Some(_) => None,
            }
        };

        if let Some(op) = op {
            self.publish(player, score, op);
        }
        entry
    }

    /// Number of live change-feed subscriptions. Lets tests wait until a
    /// listener is actually connected before mutating (like LISTEN, the feed
    /// only delivers notifications published after subscription).
    pub fn listener_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("score map poisoned").len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes the trigger-shaped payload. Errors mean "no receivers",
    /// which is fine - notifications are fire-and-forget.
    fn publish(&self, player: &PlayerName, score: Score, op: ChangeOp) {
        let payload = ChangePayload {
            player_name: player.as_str().to_string(),
            score: score.as_i64(),
            op,
        };
        let json = serde_json::to_string(&payload).expect("payload serializes");
        let _ = self.changes.send(json);
    }
}

impl Default for MemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn upsert(&self, player: &PlayerName, score: Score) -> Result<UpsertOutcome> {
        use std::collections::btree_map::Entry;

        let (outcome, op) = {
            let mut entries = self.entries.lock().expect("score map poisoned");
            match entries.entry(player.as_str().to_string()) {
                Entry::Vacant(slot) => {
                    let entry = ScoreEntry {
                        player: player.clone(),
                        score,
                        updated_at: Utc::now(),
                    };
                    slot.insert(entry.clone());
                    (
                        UpsertOutcome {
                            entry,
                            applied: true,
                        },
                        Some(ChangeOp::Insert),
                    )
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if score > existing.score {
                        existing.score = score;
                        existing.updated_at = Utc::now();
                        (
                            UpsertOutcome {
                                entry: existing.clone(),
                                applied: true,
                            },
                            Some(ChangeOp::Update),
                        )
                    } else {
                        (
                            UpsertOutcome {
                                entry: existing.clone(),
                                applied: false,
                            },
                            None,
                        )
                    }
                }
            }
        };

        if let Some(op) = op {
            self.publish(player, outcome.entry.score, op);
        }
        Ok(outcome)
    }

    async fn get(&self, player: &PlayerName) -> Result<Option<ScoreEntry>> {
        let entries = self.entries.lock().expect("score map poisoned");
        Ok(entries.get(player.as_str()).cloned())
    }

    async fn top(&self, limit: i64, offset: i64) -> Result<Vec<ScoreEntry>> {
        let mut all: Vec<ScoreEntry> = {
            let entries = self.entries.lock().expect("score map poisoned");
            entries.values().cloned().collect()
        };
        all.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn rank(&self, player: &PlayerName) -> Result<Option<i64>> {
        let entries = self.entries.lock().expect("score map poisoned");
        let Some(probe) = entries.get(player.as_str()) else {
            return Ok(None);
        };

        let better = entries
            .values()
            .filter(|q| {
                q.score > probe.score || (q.score == probe.score && q.player < probe.player)
            })
            .count() as i64;

        Ok(Some(better + 1))
    }

    async fn delete(&self, player: &PlayerName) -> Result<bool> {
        let removed = {
            let mut entries = self.entries.lock().expect("score map poisoned");
            entries.remove(player.as_str())
        };

        match removed {
            Some(entry) => {
                // Deletes report the pre-delete score.
                self.publish(player, entry.score, ChangeOp::Delete);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Notify Source
// =============================================================================

/// [`NotifySource`] over the memory store's change feed.
#[derive(Clone)]
pub struct MemoryNotifySource {
    changes: broadcast::Sender<String>,
}

#[async_trait]
impl NotifySource for MemoryNotifySource {
    type Conn = MemoryNotifyConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        Ok(MemoryNotifyConnection {
            receiver: self.changes.subscribe(),
        })
    }
}

/// One subscription to the change feed.
pub struct MemoryNotifyConnection {
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl NotifyConnection for MemoryNotifyConnection {
    async fn recv(&mut self) -> Result<String> {
        match self.receiver.recv().await {
            Ok(payload) => Ok(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                Err(Error::Listener(format!("change feed lagged by {}", n)))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(Error::Listener("change feed closed".into()))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
