//! Transport seam between a relay session and the wire.
//!
//! A [`Transport`] dials a relay and hands back a [`Socket`]. Everything the
//! connection does afterwards (opening, inbound frames, the closing
//! handshake, failures) is reported to a [`TransportListener`], tagged with
//! the [`SocketId`] the session assigned when it asked for the dial.
//!
//! Implementations must deliver listener callbacks asynchronously: never from
//! inside `open`, `send` or `close`. Callbacks may arrive on any thread.

use std::fmt;
use std::sync::Arc;
use url::Url;

/// Identifies one physical connection attempt of a session.
///
/// Ids increase monotonically per session, so callbacks from a socket the
/// session has since replaced can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opens connections to relays.
pub trait Transport: Send + Sync {
    /// Start connecting to `url`. Returns immediately; progress is reported
    /// to `listener`.
    fn open(
        &self,
        url: &Url,
        id: SocketId,
        listener: Arc<dyn TransportListener>,
    ) -> Arc<dyn Socket>;
}

/// One open (or opening) connection.
pub trait Socket: Send + Sync {
    /// Queue a text frame. Returns `false` if the socket can no longer accept it.
    fn send(&self, text: &str) -> bool;

    /// Begin a clean closing handshake. Returns `false` if that is not possible.
    fn close(&self, code: u16, reason: &str) -> bool;

    /// Tear the connection down immediately.
    fn cancel(&self);
}

/// Receives connection lifecycle signals and inbound frames.
pub trait TransportListener: Send + Sync {
    /// A dial is starting.
    fn on_connecting(&self, socket: SocketId);

    /// The connection is open and writable.
    fn on_open(&self, socket: SocketId);

    /// A text frame arrived.
    fn on_message(&self, socket: SocketId, text: &str);

    /// The remote started the closing handshake.
    fn on_closing(&self, socket: SocketId, code: u16, reason: &str);

    /// The connection is fully closed.
    fn on_closed(&self, socket: SocketId, code: u16, reason: &str);

    /// The connection failed, either while dialing or afterwards.
    fn on_failure(&self, socket: SocketId, error: &str);
}
