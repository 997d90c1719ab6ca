//! Nostr relay client for OpenAgents.
//!
//! This crate provides:
//! - Self-healing sessions to single relays (reconnect, resubscribe, resend)
//! - Message encoding and decoding (NIP-01 relay protocol)
//! - Subscription management with filters
//! - Relay sets that fan commands out and merge events with deduplication
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use nostr_client::{Filter, Relay, default_relay_set};
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let relays = default_relay_set()?;
//!
//!     // Attach before starting so nothing is missed
//!     let mut notes = relays.notes();
//!
//!     relays.start();
//!     relays.subscribe_filter(Filter::global_feed_notes());
//!
//!     while let Some(note) = notes.next().await {
//!         println!("Received note: {}", note.id);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod dedup;
mod error;
mod event;
mod listener;
mod message;
mod relay;
mod relay_set;
mod session;
mod subscription;
mod transport;
mod websocket;

pub use config::{RelayConfig, RelaySetConfig, WebSocketConfig};
pub use dedup::EventDeduplicator;
pub use error::{ClientError, Result};
pub use event::{
    Event, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_METADATA, KIND_REACTION, KIND_SHORT_TEXT_NOTE,
};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use relay::{EventStream, MessageStream, Relay};
pub use relay_set::RelaySet;
pub use session::{ConnectionState, RelaySession};
pub use subscription::{Subscription, generate_subscription_id};
pub use transport::{Socket, SocketId, Transport, TransportListener};
pub use websocket::WebSocketTransport;

/// Default relays for OpenAgents.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];

/// Create a relay set over the default OpenAgents relays.
pub fn default_relay_set() -> Result<RelaySet> {
    RelaySet::from_urls(DEFAULT_RELAYS)
}
