//! WebSocket transport built on tokio-tungstenite.
//!
//! Every [`Transport::open`] spawns one task that dials, then pumps frames
//! in both directions and keeps the connection alive with pings until the
//! connection ends. Dials that keep failing are spaced out with a growing
//! delay shared by all sockets of the transport.

use crate::config::WebSocketConfig;
use crate::error::Result;
use crate::session::current_runtime;
use crate::transport::{Socket, SocketId, Transport, TransportListener};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, trace, warn};
use url::Url;

/// No status code was present in the close frame.
const CLOSE_NO_STATUS: u16 = 1005;
/// The connection ended without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Dials relays over `ws://` and `wss://`.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    runtime: Handle,
    consecutive_failures: Arc<AtomicU32>,
}

impl WebSocketTransport {
    /// Create a transport on the current tokio runtime.
    pub fn new(config: WebSocketConfig) -> Result<Self> {
        Ok(Self::with_runtime(config, current_runtime()?))
    }

    /// Create a transport whose connection tasks run on `runtime`.
    pub fn with_runtime(config: WebSocketConfig, runtime: Handle) -> Self {
        // wss:// needs a process-wide provider; an existing one is kept
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            config,
            runtime,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Dial, keepalive and backoff settings shared by every socket.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        url: &Url,
        id: SocketId,
        listener: Arc<dyn TransportListener>,
    ) -> Arc<dyn Socket> {
        let (commands, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            url: url.clone(),
            id,
            config: self.config.clone(),
            consecutive_failures: Arc::clone(&self.consecutive_failures),
            listener,
            commands: rx,
        };
        let task = self.runtime.spawn(connection.run());
        Arc::new(WebSocketSocket { commands, task })
    }
}

enum Command {
    Text(String),
    Close(u16, String),
}

struct WebSocketSocket {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl Socket for WebSocketSocket {
    fn send(&self, text: &str) -> bool {
        self.commands.send(Command::Text(text.to_string())).is_ok()
    }

    fn close(&self, code: u16, reason: &str) -> bool {
        self.commands
            .send(Command::Close(code, reason.to_string()))
            .is_ok()
    }

    fn cancel(&self) {
        self.task.abort();
    }
}

struct Connection {
    url: Url,
    id: SocketId,
    config: WebSocketConfig,
    consecutive_failures: Arc<AtomicU32>,
    listener: Arc<dyn TransportListener>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Connection {
    async fn run(mut self) {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let delay = self.config.redial_delay_after(failures);
        if !delay.is_zero() {
            debug!(
                "Waiting {:?} before dialing {} ({} consecutive failures)",
                delay, self.url, failures
            );
            tokio::time::sleep(delay).await;
        }

        self.listener.on_connecting(self.id);
        let stream = match timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.listener
                    .on_failure(self.id, &format!("WebSocket connection failed: {}", e));
                return;
            }
            Err(_) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.listener.on_failure(
                    self.id,
                    &format!(
                        "Connection timeout after {:?}",
                        self.config.connect_timeout
                    ),
                );
                return;
            }
        };
        self.consecutive_failures.store(0, Ordering::Relaxed);
        info!("Connected to relay: {} (socket {})", self.url, self.id);
        self.listener.on_open(self.id);

        let (mut write, mut read) = stream.split();
        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        let mut close_sent = false;
        let mut close_received: Option<(u16, String)> = None;

        loop {
            tokio::select! {
                command = self.commands.recv(), if !close_sent => {
                    let outcome = match command {
                        Some(Command::Text(text)) => {
                            trace!("Writing {} (socket {})", text, self.id);
                            write.send(Message::Text(text.into())).await
                        }
                        Some(Command::Close(code, reason)) => {
                            close_sent = true;
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            write.send(Message::Close(Some(frame))).await
                        }
                        // socket handle dropped without closing
                        None => {
                            close_sent = true;
                            write.send(Message::Close(None)).await
                        }
                    };
                    if let Err(e) = outcome {
                        self.listener.on_failure(self.id, &format!("WebSocket write failed: {}", e));
                        return;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.listener.on_message(self.id, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|frame| (u16::from(frame.code), frame.reason.as_str().to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        debug!("Received close frame {} from {} (socket {})", code, self.url, self.id);
                        self.listener.on_closing(self.id, code, &reason);
                        close_received = Some((code, reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error from {}: {}", self.url, e);
                        self.listener.on_failure(self.id, &e.to_string());
                        return;
                    }
                    None => {
                        let (code, reason) = close_received
                            .take()
                            .unwrap_or((CLOSE_ABNORMAL, String::new()));
                        self.listener.on_closed(self.id, code, &reason);
                        return;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(Default::default())).await {
                        self.listener.on_failure(self.id, &format!("WebSocket ping failed: {}", e));
                        return;
                    }
                }
            }
        }
    }
}
