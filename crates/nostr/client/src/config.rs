//! Configuration for relay sessions, the WebSocket transport and relay sets.
//!
//! All structs deserialize with missing fields falling back to their
//! defaults, so an application can embed them in its own config file and
//! only spell out what it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of the outgoing command queue. Enqueueing into a full queue
    /// drops the new command.
    pub outgoing_capacity: usize,
    /// Per-consumer buffer of inbound relay messages. Slow consumers lose
    /// the oldest messages first.
    pub inbound_capacity: usize,
    /// Close code sent when the session closes its transport
    pub close_code: u16,
    /// Close reason sent when the session closes its transport
    pub close_reason: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outgoing_capacity: 512,
            inbound_capacity: 1024,
            close_code: 1000,
            close_reason: "Requested disconnection".to_string(),
        }
    }
}

/// WebSocket transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Connection timeout for a single dial
    pub connect_timeout: Duration,
    /// Ping interval for keep-alive
    pub ping_interval: Duration,
    /// Delay before redialing after a failed dial; doubles per consecutive failure
    pub redial_delay: Duration,
    /// Upper bound for the redial delay
    pub max_redial_delay: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            redial_delay: Duration::from_millis(250),
            max_redial_delay: Duration::from_secs(30),
        }
    }
}

impl WebSocketConfig {
    /// Delay to wait before the next dial, given how many dials in a row failed.
    pub fn redial_delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(16);
        self.redial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_redial_delay)
    }
}

/// Relay set configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySetConfig {
    /// Number of recently seen event ids remembered for deduplication
    pub dedup_capacity: usize,
    /// Per-consumer buffer of merged messages
    pub buffer_capacity: usize,
}

impl Default for RelaySetConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 4096,
            buffer_capacity: 1024,
        }
    }
}
