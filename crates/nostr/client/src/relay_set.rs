//! Many relays behind a single [`Relay`].
//!
//! Commands fan out to every child. Inbound messages from all children are
//! merged into one stream in which each event id appears once, as long as
//! it is still within the recent-id window.

use crate::config::RelaySetConfig;
use crate::dedup::EventDeduplicator;
use crate::error::Result;
use crate::event::Event;
use crate::message::{Filter, RelayMessage};
use crate::relay::{MessageStream, Relay, live_messages};
use crate::session::{RelaySession, current_runtime};
use crate::subscription::Subscription;
use futures::StreamExt;
use futures::stream::select_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use url::Url;

/// A set of relays acting as one.
pub struct RelaySet {
    relays: Vec<Arc<dyn Relay>>,
    merged: broadcast::Sender<RelayMessage>,
    fan_in: JoinHandle<()>,
}

impl RelaySet {
    /// Create a set over `relays` with default configuration.
    pub fn new(relays: Vec<Arc<dyn Relay>>) -> Result<Self> {
        Self::with_config(relays, RelaySetConfig::default())
    }

    /// Create a set over `relays`.
    ///
    /// The children's message streams are attached here, so anything a child
    /// receives from now on is eligible for the merged stream.
    pub fn with_config(relays: Vec<Arc<dyn Relay>>, config: RelaySetConfig) -> Result<Self> {
        let runtime = current_runtime()?;
        let (merged, _) = broadcast::channel(config.buffer_capacity.max(1));
        let streams: Vec<MessageStream> = relays.iter().map(|relay| relay.messages()).collect();
        let dedup = EventDeduplicator::new(config.dedup_capacity);
        let fan_in = runtime.spawn(merge(streams, dedup, merged.clone()));

        info!("Created relay set with {} relays", relays.len());
        Ok(Self {
            relays,
            merged,
            fan_in,
        })
    }

    /// Create a set of WebSocket sessions, one per distinct URL.
    ///
    /// URLs are compared after parsing, so `wss://relay.example.com` and
    /// `wss://relay.example.com/` name the same relay.
    pub fn from_urls<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashSet<Url> = HashSet::new();
        let mut relays: Vec<Arc<dyn Relay>> = Vec::new();
        for url in urls {
            let url = Url::parse(url.as_ref())?;
            if seen.contains(&url) {
                debug!("Skipping duplicate relay {}", url);
                continue;
            }
            relays.push(Arc::new(RelaySession::new(url.as_str())?));
            seen.insert(url);
        }
        Self::new(relays)
    }

    /// The child relays, in construction order.
    pub fn relays(&self) -> &[Arc<dyn Relay>] {
        &self.relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

impl Relay for RelaySet {
    fn start(&self) {
        for relay in &self.relays {
            relay.start();
        }
    }

    fn stop(&self) {
        for relay in &self.relays {
            relay.stop();
        }
    }

    fn send(&self, event: Event) {
        for relay in &self.relays {
            relay.send(event.clone());
        }
    }

    fn subscribe_with(&self, filters: Vec<Filter>, subscription: Subscription) -> Subscription {
        for relay in &self.relays {
            relay.subscribe_with(filters.clone(), subscription.clone());
        }
        subscription
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        for relay in &self.relays {
            relay.unsubscribe(subscription);
        }
    }

    fn messages(&self) -> MessageStream {
        live_messages(self.merged.subscribe(), "relay-set".to_string())
    }
}

impl Drop for RelaySet {
    fn drop(&mut self) {
        self.fan_in.abort();
    }
}

impl fmt::Debug for RelaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySet")
            .field("relays", &self.relays.len())
            .finish()
    }
}

async fn merge(
    streams: Vec<MessageStream>,
    mut dedup: EventDeduplicator,
    merged: broadcast::Sender<RelayMessage>,
) {
    let mut inbound = select_all(streams);
    while let Some(message) = inbound.next().await {
        if let Some(event) = message.event() {
            if !dedup.observe(&event.id) {
                trace!("Dropping duplicate event {}", event.id);
                continue;
            }
        }
        // no receivers is fine
        let _ = merged.send(message);
    }
    debug!("All relay streams ended");
}
