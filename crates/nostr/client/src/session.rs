//! Single relay connection management
//!
//! A [`RelaySession`] owns one logical connection to one relay: the
//! connection state machine, the registry of active subscriptions, and the
//! outgoing command queue. Recovery is driven by what the transport reports:
//! a failure tears the connection down and dials again, and a close dials
//! again straight away. Only [`Relay::stop`] ends the cycle.
//!
//! Once a connection has carried traffic, the registry is replayed exactly
//! once, by the sender of the next connection that opens. Failed dials in
//! between add nothing to the outgoing queue.

use crate::config::{RelayConfig, WebSocketConfig};
use crate::error::{ClientError, Result};
use crate::event::Event;
use crate::listener::{RelayListener, StateTransitions};
use crate::message::{ClientMessage, Filter};
use crate::relay::{MessageStream, Relay, live_messages};
use crate::subscription::Subscription;
use crate::transport::{Socket, SocketId, Transport, TransportListener};
use crate::websocket::WebSocketTransport;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection, none being attempted
    #[default]
    Disconnected,
    /// A connection attempt is under way
    Connecting,
    /// Connected and sending
    Connected,
    /// The transport failed; a restart is under way
    Failing,
    /// The closing handshake has begun
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failing => "Failing",
            ConnectionState::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// Relay session
pub struct RelaySession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// Relay URL
    url: Url,
    /// Configuration
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    listener: Arc<RelayListener>,
    runtime: Handle,
    /// Handed to sender tasks so a failed write can force a transition
    me: Weak<SessionInner>,
    /// Producer side of the outgoing queue
    outgoing: mpsc::Sender<String>,
    /// Consumer side of the outgoing queue, owned by the running sender task
    outbox: Arc<tokio::sync::Mutex<Outbox>>,
    state_tx: watch::Sender<ConnectionState>,
    /// State, socket, sender and registry. Held for the whole of a transition.
    core: Mutex<SessionCore>,
}

#[derive(Default)]
struct SessionCore {
    state: ConnectionState,
    socket: Option<ActiveSocket>,
    last_socket_id: u64,
    sender: Option<SenderTask>,
    /// Active subscriptions (subscription -> filters)
    subscriptions: HashMap<Subscription, Vec<Filter>>,
    /// A sender has run since the last replay, so the relay may hold
    /// subscriptions that a new connection will not have.
    delivered: bool,
    /// The next connection to open starts by replaying the registry.
    replay_pending: bool,
}

struct ActiveSocket {
    id: SocketId,
    socket: Arc<dyn Socket>,
}

struct Outbox {
    rx: mpsc::Receiver<String>,
    /// A frame whose write failed; sent again before anything else
    retry: Option<String>,
}

struct SenderTask {
    cancel: CancellationToken,
    /// Held across the cancellation check and the write
    gate: Arc<Mutex<()>>,
    handle: JoinHandle<()>,
}

impl SenderTask {
    fn cancel(self) {
        let _gate = self.gate.lock();
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl RelaySession {
    /// Create a session over WebSocket with default configuration (does not connect yet)
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a session over WebSocket with custom config
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let runtime = current_runtime()?;
        let transport = Arc::new(WebSocketTransport::with_runtime(
            WebSocketConfig::default(),
            runtime,
        ));
        Self::with_transport(url, config, transport)
    }

    /// Create a session over any transport
    pub fn with_transport(
        url: &str,
        config: RelayConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let url = parse_relay_url(url)?;
        let runtime = current_runtime()?;
        let (outgoing, rx) = mpsc::channel(config.outgoing_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|me: &Weak<SessionInner>| {
            let session: Weak<dyn StateTransitions> = me.clone();
            let listener = Arc::new(RelayListener::new(
                url.as_str(),
                config.inbound_capacity,
                session,
            ));
            SessionInner {
                url,
                config,
                transport,
                listener,
                runtime,
                me: me.clone(),
                outgoing,
                outbox: Arc::new(tokio::sync::Mutex::new(Outbox { rx, retry: None })),
                state_tx,
                core: Mutex::new(SessionCore::default()),
            }
        });

        Ok(Self { inner })
    }

    /// Get relay URL
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Snapshot of the subscription registry.
    pub fn subscriptions(&self) -> HashMap<Subscription, Vec<Filter>> {
        self.inner.core.lock().subscriptions.clone()
    }

    /// Filters registered for `subscription`, if it is active.
    pub fn filters(&self, subscription: &Subscription) -> Option<Vec<Filter>> {
        self.inner.core.lock().subscriptions.get(subscription).cloned()
    }
}

impl Relay for RelaySession {
    fn start(&self) {
        self.inner.start();
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn send(&self, event: Event) {
        info!("Enqueuing: {} [relay={}]", event.id, self.inner.url);
        self.inner.enqueue(&ClientMessage::Event(event));
    }

    fn subscribe_with(&self, filters: Vec<Filter>, subscription: Subscription) -> Subscription {
        let mut core = self.inner.core.lock();
        let req = ClientMessage::Req {
            subscription_id: subscription.id().to_string(),
            filters: filters.clone(),
        };
        core.subscriptions.insert(subscription.clone(), filters);
        if core.replay_pending {
            debug!(
                "Deferring {} to the registry replay [relay={}]",
                subscription, self.inner.url
            );
        } else {
            self.inner.enqueue(&req);
        }
        subscription
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        let mut core = self.inner.core.lock();
        if core.subscriptions.remove(subscription).is_none() {
            debug!(
                "Ignoring unsubscribe of unknown subscription {} [relay={}]",
                subscription, self.inner.url
            );
            return;
        }
        self.inner.enqueue(&ClientMessage::Close {
            subscription_id: subscription.id().to_string(),
        });
    }

    fn messages(&self) -> MessageStream {
        live_messages(self.inner.listener.subscribe(), self.inner.url.to_string())
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl SessionInner {
    fn start(&self) {
        let mut core = self.core.lock();
        if core.state != ConnectionState::Disconnected {
            debug!("Start ignored, already {} [relay={}]", core.state, self.url);
            return;
        }
        if core.socket.is_none() {
            self.open_socket(&mut core);
        } else {
            debug!("Reconnect already in flight [relay={}]", self.url);
        }
        info!(
            "{} -> {} [relay={}]",
            core.state,
            ConnectionState::Connecting,
            self.url
        );
        self.commit(&mut core, ConnectionState::Connecting);
    }

    fn stop(&self) {
        let mut core = self.core.lock();
        Self::cancel_sender(&mut core);
        self.close_socket(&mut core);
        Self::schedule_replay(&mut core);
        if core.state != ConnectionState::Disconnected {
            info!(
                "{} -> {} (stopped) [relay={}]",
                core.state,
                ConnectionState::Disconnected,
                self.url
            );
        }
        self.commit(&mut core, ConnectionState::Disconnected);
    }

    /// The only place the state is written.
    fn commit(&self, core: &mut SessionCore, state: ConnectionState) {
        core.state = state;
        self.state_tx.send_replace(state);
    }

    fn enqueue(&self, message: &ClientMessage) {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "Unable to encode {} command: {} [relay={}]",
                    message.kind(),
                    e,
                    self.url
                );
                return;
            }
        };
        match self.outgoing.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(
                "Outgoing queue full, dropping {} command [relay={}]",
                message.kind(),
                self.url
            ),
            Err(TrySendError::Closed(_)) => warn!(
                "Outgoing queue closed, dropping {} command [relay={}]",
                message.kind(),
                self.url
            ),
        }
    }

    fn open_socket(&self, core: &mut SessionCore) {
        core.last_socket_id += 1;
        let id = SocketId(core.last_socket_id);
        info!("Connecting to {} (socket {})", self.url, id);
        let listener: Arc<dyn TransportListener> = self.listener.clone();
        let socket = self.transport.open(&self.url, id, listener);
        core.socket = Some(ActiveSocket { id, socket });
    }

    fn close_socket(&self, core: &mut SessionCore) {
        if let Some(active) = core.socket.take() {
            info!("Disconnecting from {} (socket {})", self.url, active.id);
            if !active
                .socket
                .close(self.config.close_code, &self.config.close_reason)
            {
                debug!(
                    "Socket {} already gone, cancelling [relay={}]",
                    active.id, self.url
                );
                active.socket.cancel();
            }
        }
    }

    fn cancel_sender(core: &mut SessionCore) {
        if let Some(sender) = core.sender.take() {
            sender.cancel();
        }
    }

    fn start_sender(&self, core: &mut SessionCore) {
        Self::cancel_sender(core);
        let Some(active) = core.socket.as_ref() else {
            return;
        };

        let (socket_id, socket) = (active.id, Arc::clone(&active.socket));
        let replay = if core.replay_pending {
            core.replay_pending = false;
            self.registry_frames(core)
        } else {
            VecDeque::new()
        };
        core.delivered = true;

        let cancel = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let send_loop = SendLoop {
            url: self.url.to_string(),
            socket_id,
            socket,
            replay,
            outbox: Arc::clone(&self.outbox),
            session: self.me.clone(),
            cancel: cancel.clone(),
            gate: Arc::clone(&gate),
        };
        let handle = self.runtime.spawn(send_loop.run());
        core.sender = Some(SenderTask {
            cancel,
            gate,
            handle,
        });
    }

    /// Cancel, close, reopen. The registry is replayed once the new socket opens.
    fn restart(&self, core: &mut SessionCore) {
        Self::cancel_sender(core);
        self.close_socket(core);
        Self::schedule_replay(core);
        self.open_socket(core);
    }

    /// The socket is already gone; dial again straight away.
    fn reconnect(&self, core: &mut SessionCore) {
        Self::cancel_sender(core);
        core.socket = None;
        Self::schedule_replay(core);
        self.open_socket(core);
    }

    /// A dial that never opened consumed nothing from the queue, so only a
    /// connection that carried traffic calls for a replay.
    fn schedule_replay(core: &mut SessionCore) {
        if core.delivered {
            core.delivered = false;
            core.replay_pending = true;
        }
    }

    fn registry_frames(&self, core: &SessionCore) -> VecDeque<String> {
        let mut frames = VecDeque::with_capacity(core.subscriptions.len());
        for (subscription, filters) in &core.subscriptions {
            let req = ClientMessage::Req {
                subscription_id: subscription.id().to_string(),
                filters: filters.clone(),
            };
            match req.to_json() {
                Ok(frame) => {
                    debug!("Resubscribing {} [relay={}]", subscription, self.url);
                    frames.push_back(frame);
                }
                Err(e) => warn!(
                    "Unable to encode REQ for {}: {} [relay={}]",
                    subscription, e, self.url
                ),
            }
        }
        frames
    }
}

impl StateTransitions for SessionInner {
    fn transition(&self, socket: SocketId, target: ConnectionState) {
        let mut core = self.core.lock();
        if core.socket.as_ref().map(|active| active.id) != Some(socket) {
            debug!(
                "Ignoring {} from superseded socket {} [relay={}]",
                target, socket, self.url
            );
            return;
        }

        info!("{} -> {} [relay={}]", core.state, target, self.url);
        match target {
            ConnectionState::Connecting => {}
            ConnectionState::Connected => self.start_sender(&mut core),
            ConnectionState::Failing => self.restart(&mut core),
            ConnectionState::Disconnected => self.reconnect(&mut core),
            ConnectionState::Disconnecting => Self::cancel_sender(&mut core),
        }
        self.commit(&mut core, target);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(sender) = core.sender.take() {
            sender.cancel();
        }
        if let Some(active) = core.socket.take() {
            let closed = active
                .socket
                .close(self.config.close_code, &self.config.close_reason);
            if !closed {
                active.socket.cancel();
            }
        }
    }
}

/// Background task draining the outgoing queue into one socket.
struct SendLoop {
    url: String,
    socket_id: SocketId,
    socket: Arc<dyn Socket>,
    /// Registry frames written ahead of the queue. Never moved to the retry
    /// slot: a replay cut short is scheduled again by the next transition.
    replay: VecDeque<String>,
    outbox: Arc<tokio::sync::Mutex<Outbox>>,
    session: Weak<SessionInner>,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
}

impl SendLoop {
    async fn run(mut self) {
        let mut outbox = tokio::select! {
            _ = self.cancel.cancelled() => return,
            outbox = Arc::clone(&self.outbox).lock_owned() => outbox,
        };
        info!("Starting send loop [relay={}]", self.url);

        loop {
            let (frame, replayed) = if let Some(frame) = outbox.retry.take() {
                (frame, false)
            } else if let Some(frame) = self.replay.pop_front() {
                (frame, true)
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    frame = outbox.rx.recv() => match frame {
                        Some(frame) => (frame, false),
                        None => break,
                    },
                }
            };

            let accepted = {
                let _gate = self.gate.lock();
                if self.cancel.is_cancelled() {
                    if !replayed {
                        outbox.retry = Some(frame);
                    }
                    break;
                }
                debug!("Sending [relay={}] {}", self.url, frame);
                self.socket.send(&frame)
            };

            if !accepted {
                warn!(
                    "Failed to send on socket. Re-enqueueing & restarting. [relay={}]",
                    self.url
                );
                if !replayed {
                    outbox.retry = Some(frame);
                }
                drop(outbox);
                if let Some(session) = self.session.upgrade() {
                    session.transition(self.socket_id, ConnectionState::Failing);
                }
                return;
            }
        }

        debug!("Send loop stopped [relay={}]", self.url);
    }
}

fn parse_relay_url(url: &str) -> Result<Url> {
    let url = Url::parse(url)?;

    // Validate WebSocket URL
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

pub(crate) fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| ClientError::NoRuntime(e.to_string()))
}
