//! Transport adapter for a relay session.
//!
//! Decodes inbound frames into [`RelayMessage`]s, fans them out to every
//! consumer of the session's message stream, and forwards each transport
//! lifecycle callback to the session's transition function exactly once.
//! It never touches the transport itself.

use crate::message::RelayMessage;
use crate::session::ConnectionState;
use crate::transport::{SocketId, TransportListener};
use std::sync::Weak;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// The session side of the adapter: the serialized transition function.
pub(crate) trait StateTransitions: Send + Sync {
    fn transition(&self, socket: SocketId, target: ConnectionState);
}

pub(crate) struct RelayListener {
    label: String,
    messages: broadcast::Sender<RelayMessage>,
    session: Weak<dyn StateTransitions>,
}

impl RelayListener {
    pub(crate) fn new(
        label: impl Into<String>,
        capacity: usize,
        session: Weak<dyn StateTransitions>,
    ) -> Self {
        let (messages, _) = broadcast::channel(capacity.max(1));
        Self {
            label: label.into(),
            messages,
            session,
        }
    }

    /// Attach a new consumer of inbound messages.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.messages.subscribe()
    }

    fn update(&self, socket: SocketId, target: ConnectionState) {
        match self.session.upgrade() {
            Some(session) => session.transition(socket, target),
            None => debug!(
                "Session dropped, ignoring {} from socket {} [relay={}]",
                target, socket, self.label
            ),
        }
    }
}

impl TransportListener for RelayListener {
    fn on_connecting(&self, socket: SocketId) {
        debug!("Socket {} is connecting. [relay={}]", socket, self.label);
        self.update(socket, ConnectionState::Connecting);
    }

    fn on_open(&self, socket: SocketId) {
        info!("Socket {} is open. [relay={}]", socket, self.label);
        self.update(socket, ConnectionState::Connected);
    }

    fn on_message(&self, socket: SocketId, text: &str) {
        trace!("Received {} on socket {}. [relay={}]", text, socket, self.label);
        match RelayMessage::from_json(text) {
            // no receivers is fine, nobody is listening yet
            Ok(message) => {
                let _ = self.messages.send(message);
            }
            Err(e) => warn!(
                "Unable to handle relay message: {} ({}). [relay={}]",
                text, e, self.label
            ),
        }
    }

    fn on_closing(&self, socket: SocketId, code: u16, reason: &str) {
        info!(
            "Socket {} is closing ({} {}). [relay={}]",
            socket, code, reason, self.label
        );
        self.update(socket, ConnectionState::Disconnecting);
    }

    fn on_closed(&self, socket: SocketId, code: u16, reason: &str) {
        info!(
            "Socket {} is closed ({} {}). [relay={}]",
            socket, code, reason, self.label
        );
        self.update(socket, ConnectionState::Disconnected);
    }

    fn on_failure(&self, socket: SocketId, error: &str) {
        info!("Socket {} failed: {}. [relay={}]", socket, error, self.label);
        self.update(socket, ConnectionState::Failing);
    }
}
