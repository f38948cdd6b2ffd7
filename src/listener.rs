//! # Change Listener
//!
//! This module converts the store's change channel into an in-process stream
//! of [`ChangeEvent`]s, surviving transient infrastructure failures. It is
//! the single reader feeding the broadcaster.
//!
//! ## The Reconnect State Machine
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                                                                      │
//! │   ┌──────────────┐  backoff   ┌──────────────┐   LISTEN ok           │
//! │   │ Disconnected │ ─────────► │  Connecting  │ ─────────────┐        │
//! │   └──────────────┘  elapsed   └──────┬───────┘              │        │
//! │          ▲                           │ connect failed       ▼        │
//! │          │                           │              ┌──────────────┐ │
//! │          │◄──────────────────────────┘              │  Listening   │ │
//! │          │                                          └──────┬───────┘ │
//! │          │            read failed                          │         │
//! │          └─────────────────────────────────────────────────┘         │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The phase lives in an explicit [`Phase`] enum and the retry delay in a
//! [`Backoff`] value, not in loop-local variables: the state machine is the
//! design, so it should be legible as one.
//!
//! ## Delivery Guarantee
//!
//! *At-most-once* through the events stream. When the stream is full the
//! listener waits a bounded interval (`forward_timeout`, default 1s) for
//! space, then drops the event with a warning. This bounds memory at the
//! cost of subscriber staleness; reconnecting clients resynchronize through
//! a fresh snapshot, so dropped notifications never become permanent drift.
//!
//! ## Failure Policy
//!
//! - Connect / LISTEN / read failures: log, emit on the errors stream,
//!   back off (1s doubling to 60s, reset on success), reconnect.
//! - A malformed payload: emit on the errors stream and keep reading - one
//!   bad message is not a reason to drop a healthy connection.
//! - Shutdown: close both streams and release the connection.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::types::{ChangeEvent, ChangePayload};

// =============================================================================
// The Change-Channel Seam
// =============================================================================

/// A factory for change-channel connections.
///
/// The Postgres implementation LISTENs on a dedicated connection; the
/// in-memory implementation subscribes to the memory store's broadcast feed.
/// The listener owns reconnection, so a source must be able to connect any
/// number of times.
#[async_trait]
pub trait NotifySource: Send + Sync + 'static {
    /// The connection type this source produces.
    type Conn: NotifyConnection + 'static;

    /// Acquires a fresh, subscribed connection to the change channel.
    async fn connect(&self) -> Result<Self::Conn>;
}

/// One live subscription to the change channel.
#[async_trait]
pub trait NotifyConnection: Send {
    /// Waits for the next raw notification payload.
    ///
    /// An error here means the connection is no longer usable; the listener
    /// drops it and reconnects.
    async fn recv(&mut self) -> Result<String>;
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff holder: `initial`, doubling to `max`, reset on
/// success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` with ceiling `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to sleep now and advances to the next step.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Resets to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The delay the next failure would sleep for.
    pub fn current(&self) -> Duration {
        self.current
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Where the listener is in its connect/read cycle. `Listening` owns the
/// live connection, so holding a connection and being in the listening
/// phase are the same fact.
enum Phase<C> {
    /// No connection; waiting out the backoff delay.
    Disconnected,
    /// Acquiring and subscribing a fresh connection.
    Connecting,
    /// Consuming notifications on the held connection.
    Listening(C),
}

/// Read side of a running listener: the events stream, the (lossy) errors
/// stream, and the task handle.
pub struct ListenerHandle {
    /// Parsed change events, in channel order. Closed on shutdown.
    pub events: mpsc::Receiver<ChangeEvent>,

    /// Transient faults and malformed payloads, for observability. Lossy:
    /// when full, new errors are logged and dropped.
    pub errors: mpsc::Receiver<Error>,

    /// The listener task. Resolves after shutdown is signalled.
    pub task: JoinHandle<()>,
}

/// The change listener: owns the notification connection and the reconnect
/// policy.
pub struct ChangeListener<S: NotifySource> {
    source: S,
    config: ListenerConfig,
    backoff: Backoff,
    phase: Phase<S::Conn>,
    events_tx: mpsc::Sender<ChangeEvent>,
    errors_tx: mpsc::Sender<Error>,
    shutdown: watch::Receiver<bool>,
}

impl<S: NotifySource> ChangeListener<S> {
    /// Spawns the listener loop.
    ///
    /// `shutdown` is the process-wide stop signal: flip it to `true` and the
    /// listener closes both streams, drops its connection, and exits.
    pub fn spawn(
        source: S,
        config: ListenerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> ListenerHandle {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let (errors_tx, errors_rx) = mpsc::channel(config.error_buffer);

        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        let listener = Self {
            source,
            config,
            backoff,
            phase: Phase::Connecting,
            events_tx,
            errors_tx,
            shutdown,
        };

        let task = tokio::spawn(listener.run());

        ListenerHandle {
            events: events_rx,
            errors: errors_rx,
            task,
        }
    }

    /// The listener loop. Drives the phase machine until shutdown.
    async fn run(mut self) {
        info!(channel = %self.config.channel, "change listener starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.phase = match std::mem::replace(&mut self.phase, Phase::Disconnected) {
                Phase::Disconnected => {
                    let delay = self.backoff.next_delay();
                    debug!(?delay, "backing off before reconnect");
                    tokio::select! {
                        _ = self.shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    Phase::Connecting
                }

                Phase::Connecting => match self.source.connect().await {
                    Ok(conn) => {
                        info!(channel = %self.config.channel, "listening for change notifications");
                        self.backoff.reset();
                        Phase::Listening(conn)
                    }
                    Err(e) => {
                        error!(error = %e, "failed to connect to change channel");
                        self.report(Error::Listener(format!("connect: {}", e)));
                        Phase::Disconnected
                    }
                },

                Phase::Listening(conn) => {
                    // Returns on read failure or shutdown; either way the
                    // connection is dropped here.
                    self.listen(conn).await;
                    Phase::Disconnected
                }
            };
        }

        info!("change listener shutting down");
        // Dropping the senders closes both streams for downstream readers.
    }

    /// Consumes notifications on one connection until it fails or shutdown.
    async fn listen(&mut self, mut conn: S::Conn) {
        loop {
            let payload = tokio::select! {
                _ = self.shutdown.changed() => return,
                received = conn.recv() => match received {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "notification read failed, will reconnect");
                        self.report(Error::Listener(format!("read: {}", e)));
                        return;
                    }
                },
            };

            debug!(payload = %payload, "notification received");

            let event = match parse_payload(&payload) {
                Ok(event) => event,
                Err(e) => {
                    // One bad message; the connection stays up.
                    warn!(error = %e, payload = %payload, "dropping malformed payload");
                    self.report(e);
                    continue;
                }
            };

            self.forward(event).await;
        }
    }

    /// Forwards an event, waiting a bounded interval for stream space.
    async fn forward(&mut self, event: ChangeEvent) {
        match timeout(self.config.forward_timeout, self.events_tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver dropped; nothing downstream wants events anymore.
                debug!("events stream closed, discarding notification");
            }
            Err(_) => {
                warn!(
                    waited = ?self.config.forward_timeout,
                    "events stream full, dropping notification"
                );
            }
        }
    }

    /// Pushes onto the errors stream without ever blocking the loop.
    fn report(&self, err: Error) {
        if let Err(mpsc::error::TrySendError::Full(err)) = self.errors_tx.try_send(err) {
            warn!(error = %err, "errors stream full, dropping error");
        }
    }
}

/// Parses one raw payload into a validated [`ChangeEvent`].
fn parse_payload(payload: &str) -> Result<ChangeEvent> {
    let parsed: ChangePayload = serde_json::from_str(payload)
        .map_err(|e| Error::MalformedPayload(format!("invalid JSON: {}", e)))?;
    parsed.into_event()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeOp;

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        // Pinned at the ceiling.
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn parse_payload_accepts_trigger_output() {
        let event =
            parse_payload(r#"{"player_name":"Alice","score":1000,"op":"insert"}"#).unwrap();
        assert_eq!(event.player.as_str(), "Alice");
        assert_eq!(event.score.as_i64(), 1000);
        assert_eq!(event.op, ChangeOp::Insert);
    }

    #[test]
    fn parse_payload_rejects_garbage() {
        assert!(matches!(
            parse_payload("not json at all"),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"player_name":"Alice"}"#),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"player_name":"","score":1,"op":"insert"}"#),
            Err(Error::MalformedPayload(_))
        ));
    }
}
