//! The capability set shared by a single relay session and a relay set.
//!
//! Commands are non-blocking: they update local state and queue wire
//! commands, and never report transport errors to the caller. What comes back
//! from the relay is observed through [`Relay::messages`] and the feeds
//! derived from it.

use crate::event::{
    Event, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_METADATA, KIND_REACTION, KIND_SHORT_TEXT_NOTE,
};
use crate::message::{Filter, RelayMessage};
use crate::subscription::Subscription;
use futures::future::ready;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

/// Live sequence of relay messages.
pub type MessageStream = BoxStream<'static, RelayMessage>;

/// Live sequence of events.
pub type EventStream = BoxStream<'static, Event>;

/// A connection-like object: one relay, or many behind one face.
pub trait Relay: Send + Sync {
    /// Begin sending and receiving with this relay.
    fn start(&self);

    /// Stop sending and receiving with this relay.
    fn stop(&self);

    /// Queue an event to be published.
    fn send(&self, event: Event);

    /// Open `subscription` with zero or more filters. Returns the handle
    /// without waiting for the relay to acknowledge it.
    fn subscribe_with(&self, filters: Vec<Filter>, subscription: Subscription) -> Subscription;

    /// Close a subscription. Unknown subscriptions are ignored.
    fn unsubscribe(&self, subscription: &Subscription);

    /// Messages received from here on, for our subscriptions and commands.
    ///
    /// Each call returns an independent consumer; it does not replay
    /// anything received before it was created.
    fn messages(&self) -> MessageStream;

    /// Open a subscription with a generated id.
    fn subscribe(&self, filters: Vec<Filter>) -> Subscription {
        self.subscribe_with(filters, Subscription::generate())
    }

    /// Open a subscription with exactly one filter and a generated id.
    fn subscribe_filter(&self, filter: Filter) -> Subscription {
        self.subscribe(vec![filter])
    }

    /// The events carried by [`Relay::messages`].
    fn events(&self) -> EventStream {
        self.messages()
            .filter_map(|message| ready(message.into_event()))
            .boxed()
    }

    /// Events of a single kind.
    fn events_of_kind(&self, kind: u16) -> EventStream {
        self.events()
            .filter(move |event| ready(event.kind == kind))
            .boxed()
    }

    /// Text notes (kind 1).
    fn notes(&self) -> EventStream {
        self.events_of_kind(KIND_SHORT_TEXT_NOTE)
    }

    /// Encrypted direct messages (kind 4).
    fn direct_messages(&self) -> EventStream {
        self.events_of_kind(KIND_ENCRYPTED_DIRECT_MESSAGE)
    }

    /// User metadata (kind 0).
    fn user_metadata(&self) -> EventStream {
        self.events_of_kind(KIND_METADATA)
    }

    /// Reactions (kind 7).
    fn reactions(&self) -> EventStream {
        self.events_of_kind(KIND_REACTION)
    }
}

/// Turn a broadcast receiver into a message stream. A consumer that falls
/// more than the channel capacity behind skips the oldest messages.
pub(crate) fn live_messages(
    rx: broadcast::Receiver<RelayMessage>,
    label: String,
) -> MessageStream {
    BroadcastStream::new(rx)
        .filter_map(move |item| {
            let message = match item {
                Ok(message) => Some(message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Consumer lagged, skipped {} messages [relay={}]", skipped, label);
                    None
                }
            };
            ready(message)
        })
        .boxed()
}
