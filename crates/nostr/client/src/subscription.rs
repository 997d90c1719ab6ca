//! Subscription handles.
//!
//! A subscription is identified only by its id. The filters it was opened
//! with live in the owning session's registry, which is what gets replayed
//! after a reconnect.

use std::fmt;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()
}

/// A named live query on one or more relays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription {
    id: String,
}

impl Subscription {
    /// Create a subscription handle with a caller-chosen id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Create a subscription handle with a random id.
    pub fn generate() -> Self {
        Self::new(generate_subscription_id())
    }

    /// The subscription id sent in `REQ` and `CLOSE`.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Subscription {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Subscription {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
