//! # Subscriptions
//!
//! One [`StreamSession`] per live streaming client. A session emits exactly
//! one snapshot, then forwards deltas from its mailbox until the client
//! disconnects, the server shuts down, or a send fails.
//!
//! ## Lifecycle
//!
//! ```text
//!  Starting ──(snapshot sent)──► Live ──(cancel | hub close | send error)──► Closed
//!     │
//!     └──(snapshot read failed)─────────────────────────────────────────► Closed
//! ```
//!
//! ## Snapshot/Delta Consistency
//!
//! The snapshot is read *before* the mailbox registers, so a change landing
//! in that window is missed by this session. That is deliberate: registering
//! first would require buffering deltas while the snapshot read is in
//! flight, for a window clients must tolerate anyway (they reconcile deltas
//! idempotently by player and resynchronize via reconnect). The invariant
//! that matters holds: replaying any delta suffix onto a sufficiently recent
//! snapshot reaches every committed state.
//!
//! ## Control Flow
//!
//! The live phase is one `select!` over three wake conditions - cancellation
//! (biased first, so a disconnecting client never waits behind a burst of
//! updates), the mailbox, and implicitly the peer via [`UpdateSink::send`]
//! errors. Dropping the mailbox on exit unregisters it from the hub; pending
//! updates are discarded.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::error::{Error, Result};
use crate::service::Leaderboard;
use crate::types::Update;

// =============================================================================
// The Peer Seam
// =============================================================================

/// Where a session writes its updates: the peer side of the stream.
///
/// The streaming transport implements this over its wire connection;
/// [`ChannelSink`] is the in-memory implementation tests (and in-process
/// consumers) use. A send resolves when the update is handed to the peer,
/// and an error means the peer is gone - the session ends.
#[async_trait]
pub trait UpdateSink: Send {
    /// Delivers one update to the peer.
    async fn send(&mut self, update: Update) -> Result<()>;
}

/// [`UpdateSink`] over an in-process channel.
///
/// The in-memory transport: tests and embedded consumers read the stream
/// from the receiving half exactly as a remote client would from the wire.
pub struct ChannelSink {
    updates: mpsc::Sender<Update>,
}

impl ChannelSink {
    /// Creates a sink and the receiver a test reads from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { updates: tx }, rx)
    }
}

#[async_trait]
impl UpdateSink for ChannelSink {
    async fn send(&mut self, update: Update) -> Result<()> {
        self.updates
            .send(update)
            .await
            .map_err(|_| Error::Delivery("stream receiver dropped".into()))
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created; the snapshot has not been sent yet.
    Starting,
    /// Snapshot delivered; forwarding deltas.
    Live,
    /// Finished - cleanly or not. Terminal.
    Closed,
}

// =============================================================================
// Stream Session
// =============================================================================

/// One streaming client's session.
pub struct StreamSession {
    service: Leaderboard,
    broadcaster: Broadcaster,
    state: SubscriptionState,
}

impl StreamSession {
    /// Creates a session. Nothing happens until [`serve`](Self::serve).
    pub fn new(service: Leaderboard, broadcaster: Broadcaster) -> Self {
        Self {
            service,
            broadcaster,
            state: SubscriptionState::Starting,
        }
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// 1. Clamp `initial_limit`, read the top-K snapshot, send it.
    /// 2. Register a mailbox with the broadcaster.
    /// 3. Forward deltas until `cancel` flips, the hub closes the mailbox,
    ///    or a send fails.
    ///
    /// `cancel` carries both peer disconnect and server shutdown; the
    /// transport ties it to whichever fires first. A dropped cancel sender
    /// counts as cancellation.
    ///
    /// # Errors
    ///
    /// A failed snapshot read or a failed send; either way the session is
    /// `Closed` and the mailbox (if registered) is gone.
    pub async fn serve<S: UpdateSink>(
        &mut self,
        initial_limit: i64,
        sink: &mut S,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        debug_assert_eq!(self.state, SubscriptionState::Starting);

        let limit = self.service.clamp_limit(initial_limit);

        let snapshot = match self.service.top(limit, 0).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "snapshot read failed, closing stream");
                self.state = SubscriptionState::Closed;
                return Err(e);
            }
        };

        if let Err(e) = sink.send(Update::Snapshot { snapshot }).await {
            self.state = SubscriptionState::Closed;
            return Err(e);
        }

        // Register only after the snapshot went out; see the module docs for
        // why the window in between is accepted.
        let mut mailbox = self.broadcaster.subscribe();
        self.state = SubscriptionState::Live;
        info!(subscriber = %mailbox.id(), limit, "client subscribed to leaderboard stream");

        let result = loop {
            if *cancel.borrow() {
                info!(subscriber = %mailbox.id(), "client disconnected");
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = cancel.changed() => {
                    // A closed cancel channel means the owning transport
                    // session is gone; treat it the same as cancellation.
                    if changed.is_err() || *cancel.borrow() {
                        info!(subscriber = %mailbox.id(), "client disconnected");
                        break Ok(());
                    }
                }

                update = mailbox.recv() => match update {
                    Some(update) => {
                        // The send itself races cancellation: a client
                        // hanging up mid-send must not leave the session
                        // wedged on a full peer.
                        tokio::select! {
                            biased;

                            _ = cancel.changed() => {
                                info!(subscriber = %mailbox.id(), "client disconnected mid-send");
                                break Ok(());
                            }

                            sent = sink.send(update) => {
                                if let Err(e) = sent {
                                    error!(subscriber = %mailbox.id(), error = %e, "update send failed");
                                    break Err(e);
                                }
                            }
                        }
                    }
                    None => {
                        info!(subscriber = %mailbox.id(), "broadcaster closed, ending stream");
                        break Ok(());
                    }
                },
            }
        };

        self.state = SubscriptionState::Closed;
        // Dropping the mailbox here unregisters it; anything still queued is
        // discarded.
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
