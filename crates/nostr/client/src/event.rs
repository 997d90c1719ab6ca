//! The event shape carried by relays (NIP-01).
//!
//! Events are opaque to this crate: they are serialized into `EVENT` commands
//! and decoded from relay `EVENT` messages, and their `id` is used as the
//! deduplication key when merging relays. No signature checking happens here.

use serde::{Deserialize, Serialize};

/// Kind 0: user metadata.
pub const KIND_METADATA: u16 = 0;
/// Kind 1: short text note.
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
/// Kind 4: encrypted direct message (NIP-04).
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;
/// Kind 7: reaction (NIP-25).
pub const KIND_REACTION: u16 = 7;

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}
