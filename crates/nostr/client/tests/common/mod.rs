//! Shared harness for the integration tests: a scripted in-memory transport,
//! a relay double for set tests, fixtures and polling helpers.

#![allow(dead_code)]

use futures::StreamExt;
use nostr_client::{
    Event, Filter, MessageStream, Relay, RelayMessage, Socket, SocketId, Subscription, Transport,
    TransportListener,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_stream::wrappers::BroadcastStream;
use url::Url;

pub const RELAY_URL: &str = "wss://relay.example.com";
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn event(id: &str, kind: u16) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "a".repeat(64),
        created_at: 1_700_000_000,
        kind,
        tags: vec![],
        content: format!("content of {}", id),
        sig: "b".repeat(128),
    }
}

pub fn event_message(subscription_id: &str, id: &str) -> RelayMessage {
    RelayMessage::Event {
        subscription_id: subscription_id.to_string(),
        event: event(id, 1),
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Next item of `stream`, failing the test after [`WAIT`].
pub async fn next_message(stream: &mut MessageStream) -> RelayMessage {
    timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
}

/// Assert that `stream` yields nothing for a short while.
pub async fn assert_quiet(stream: &mut MessageStream) {
    if let Ok(item) = timeout(Duration::from_millis(50), stream.next()).await {
        panic!("unexpected message: {:?}", item);
    }
}

/// Transport that records every socket it opens and lets the test play the
/// role of the network.
#[derive(Default)]
pub struct MockTransport {
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of dials so far.
    pub fn open_count(&self) -> usize {
        self.sockets.lock().len()
    }

    pub fn socket(&self, index: usize) -> Arc<MockSocket> {
        Arc::clone(&self.sockets.lock()[index])
    }

    pub fn latest(&self) -> Arc<MockSocket> {
        let sockets = self.sockets.lock();
        Arc::clone(sockets.last().expect("no socket opened"))
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        _url: &Url,
        id: SocketId,
        listener: Arc<dyn TransportListener>,
    ) -> Arc<dyn Socket> {
        let socket = Arc::new(MockSocket {
            id,
            listener,
            frames: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
            closable: AtomicBool::new(true),
            closed_with: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        self.sockets.lock().push(Arc::clone(&socket));
        socket
    }
}

pub struct MockSocket {
    pub id: SocketId,
    listener: Arc<dyn TransportListener>,
    frames: Mutex<Vec<String>>,
    accepting: AtomicBool,
    closable: AtomicBool,
    closed_with: Mutex<Option<(u16, String)>>,
    cancelled: AtomicBool,
}

impl MockSocket {
    /// Frames written so far.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Make every following write fail.
    pub fn reject_writes(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Make `close` report that the connection is already gone.
    pub fn refuse_close(&self) {
        self.closable.store(false, Ordering::SeqCst);
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn fire_connecting(&self) {
        self.listener.on_connecting(self.id);
    }

    pub fn fire_open(&self) {
        self.listener.on_open(self.id);
    }

    pub fn fire_message(&self, text: &str) {
        self.listener.on_message(self.id, text);
    }

    pub fn fire_closing(&self, code: u16, reason: &str) {
        self.listener.on_closing(self.id, code, reason);
    }

    pub fn fire_closed(&self, code: u16, reason: &str) {
        self.listener.on_closed(self.id, code, reason);
    }

    pub fn fire_failure(&self, error: &str) {
        self.listener.on_failure(self.id, error);
    }
}

impl Socket for MockSocket {
    fn send(&self, text: &str) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.frames.lock().push(text.to_string());
        true
    }

    fn close(&self, code: u16, reason: &str) -> bool {
        if !self.closable.load(Ordering::SeqCst) {
            return false;
        }
        *self.closed_with.lock() = Some((code, reason.to_string()));
        true
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// What a [`FakeRelay`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start,
    Stop,
    Send(String),
    Subscribe(String, Vec<Filter>),
    Unsubscribe(String),
}

/// A relay whose inbound messages are pushed by the test.
pub struct FakeRelay {
    inbound: broadcast::Sender<RelayMessage>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        let (inbound, _) = broadcast::channel(8192);
        Arc::new(Self {
            inbound,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, message: RelayMessage) {
        self.inbound
            .send(message)
            .expect("relay set is not attached");
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl Relay for FakeRelay {
    fn start(&self) {
        self.calls.lock().push(Call::Start);
    }

    fn stop(&self) {
        self.calls.lock().push(Call::Stop);
    }

    fn send(&self, event: Event) {
        self.calls.lock().push(Call::Send(event.id));
    }

    fn subscribe_with(&self, filters: Vec<Filter>, subscription: Subscription) -> Subscription {
        self.calls
            .lock()
            .push(Call::Subscribe(subscription.id().to_string(), filters));
        subscription
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        self.calls
            .lock()
            .push(Call::Unsubscribe(subscription.id().to_string()));
    }

    fn messages(&self) -> MessageStream {
        BroadcastStream::new(self.inbound.subscribe())
            .filter_map(|item| futures::future::ready(item.ok()))
            .boxed()
    }
}
