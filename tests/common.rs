#![allow(dead_code)]

//! Shared helpers: the in-memory pipeline (store -> listener -> broadcaster)
//! and a streaming client over the same seams the real transport uses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use scorestack::{
    Broadcaster, BroadcasterConfig, ChangeListener, ChannelSink, Error, Leaderboard,
    ListenerConfig, MemoryScoreStore, ScoreStore, StreamSession, Update,
};

/// How long a test will wait for an update before declaring it missing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// The full in-memory pipeline, wired the way production wires Postgres.
pub struct Stack {
    pub store: Arc<MemoryScoreStore>,
    pub service: Leaderboard,
    pub hub: Broadcaster,
    pub listener_errors: mpsc::Receiver<Error>,
    shutdown: watch::Sender<bool>,
    listener_task: JoinHandle<()>,
    hub_task: JoinHandle<()>,
}

impl Stack {
    /// Signals shutdown and waits for the listener and hub to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.listener_task.await.expect("listener task panicked");
        self.hub_task.await.expect("hub task panicked");
    }
}

/// Starts the pipeline with default tunables.
pub async fn start_stack() -> Stack {
    start_stack_with(ListenerConfig::default(), BroadcasterConfig::default()).await
}

/// Starts the pipeline with custom tunables and waits until the listener is
/// subscribed to the change feed, so no test mutation can race the connect.
pub async fn start_stack_with(
    listener_config: ListenerConfig,
    broadcaster_config: BroadcasterConfig,
) -> Stack {
    let store = Arc::new(MemoryScoreStore::new());
    let service = Leaderboard::new(store.clone() as Arc<dyn ScoreStore>);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = ChangeListener::spawn(store.notify_source(), listener_config, shutdown_rx);

    let hub = Broadcaster::new(broadcaster_config);
    let hub_task = tokio::spawn(hub.clone().run(handle.events));

    let stack = Stack {
        store: store.clone(),
        service,
        hub,
        listener_errors: handle.errors,
        shutdown,
        listener_task: handle.task,
        hub_task,
    };

    eventually(RECV_TIMEOUT, Duration::from_millis(5), || {
        (store.listener_count() > 0).then_some(())
    })
    .await;

    stack
}

/// A streaming client: the receiving half of a [`ChannelSink`] plus the
/// session's cancel handle and task.
pub struct StreamClient {
    pub updates: mpsc::Receiver<Update>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<scorestack::Result<()>>,
}

impl StreamClient {
    /// Awaits the next update, failing the test after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Update {
        timeout(RECV_TIMEOUT, self.updates.recv())
            .await
            .expect("timed out waiting for update")
            .expect("stream closed unexpectedly")
    }

    /// Disconnects and returns the session result.
    pub async fn disconnect(self) -> scorestack::Result<()> {
        let _ = self.cancel.send(true);
        self.task.await.expect("session task panicked")
    }

    /// Waits for the session to end on its own (e.g. server shutdown).
    pub async fn wait(self) -> scorestack::Result<()> {
        self.task.await.expect("session task panicked")
    }
}

/// Subscribes a new streaming client with the given initial limit and sink
/// capacity, and waits for the session to register with the hub.
pub async fn subscribe_with(stack: &Stack, initial_limit: i64, capacity: usize) -> StreamClient {
    let (mut sink, updates) = ChannelSink::new(capacity);
    let (cancel, cancel_rx) = watch::channel(false);

    let service = stack.service.clone();
    let hub = stack.hub.clone();
    let before = hub.subscriber_count();

    let task = tokio::spawn(async move {
        let mut session = StreamSession::new(service, hub);
        session.serve(initial_limit, &mut sink, cancel_rx).await
    });

    let hub = stack.hub.clone();
    eventually(RECV_TIMEOUT, Duration::from_millis(5), || {
        (hub.subscriber_count() > before).then_some(())
    })
    .await;

    StreamClient {
        updates,
        cancel,
        task,
    }
}

/// Subscribes with the defaults most tests want.
pub async fn subscribe(stack: &Stack) -> StreamClient {
    subscribe_with(stack, 10, 64).await
}

/// Polls `f` until it returns `Some`, or panics after `deadline`.
pub async fn eventually<T>(
    deadline: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > deadline {
            panic!("condition not met within {:?}", deadline);
        }
        tokio::time::sleep(interval).await;
    }
}
