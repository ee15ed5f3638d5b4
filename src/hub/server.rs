//! WebSocket front end for the broadcast hub
//!
//! Accepts dashboard connections, registers each socket as a hub session
//! and pumps that session's outbox into the socket. All socket I/O happens
//! in per-client tasks; the hub itself only ever performs non-blocking
//! channel sends.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::{BroadcastHub, SessionId};

/// Configuration for the WebSocket listener
#[derive(Debug, Clone)]
pub struct HubServerConfig {
    /// Port to listen on (0 picks a free port)
    pub port: u16,
}

impl Default for HubServerConfig {
    fn default() -> Self {
        Self { port: 3310 }
    }
}

/// WebSocket listener feeding the broadcast hub
pub struct HubServer {
    hub: Arc<BroadcastHub>,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl HubServer {
    /// Bind the listener. Binding is separate from [`HubServer::run`] so
    /// callers (and tests) can learn the actual address before accepting.
    pub async fn bind(config: HubServerConfig, hub: Arc<BroadcastHub>) -> anyhow::Result<Self> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            hub,
            listener,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a sender for triggering graceful shutdown
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown is triggered
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.listener.local_addr()?, "Subscriber WebSocket server started");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_new_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Subscriber WebSocket server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Perform the WebSocket handshake, register the session and hand the
    /// socket to its pump task. No hub lock is held across the handshake.
    async fn handle_new_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(addr = %addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<String>();
        let session_id = self.hub.subscribe(outbox_tx).await;
        info!(session_id, addr = %addr, "Subscriber connected");

        let hub = Arc::clone(&self.hub);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            client_task(session_id, ws_stream, outbox_rx, hub, shutdown_rx).await;
        });
    }
}

/// Pump one client's outbox into its socket and watch the inbound half for
/// liveness and close. Every exit path ends in `unsubscribe`, which is
/// idempotent with removals the hub may already have performed.
async fn client_task(
    session_id: SessionId,
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut outbox_rx: mpsc::UnboundedReceiver<String>,
    hub: Arc<BroadcastHub>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            // Outgoing payloads from the hub
            payload = outbox_rx.recv() => {
                match payload {
                    Some(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            debug!(session_id, error = %e, "Failed to send payload");
                            break;
                        }
                    }
                    None => {
                        // Hub dropped the session
                        break;
                    }
                }
            }
            // Incoming frames (pings, pongs, close)
            msg_result = ws_rx.next() => {
                match msg_result {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!(session_id, error = %e, "Failed to send pong");
                            break;
                        }
                        hub.touch(session_id).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        hub.touch(session_id).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session_id, "Subscriber requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(session_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(session_id, "Connection closed");
                        break;
                    }
                    _ => {
                        // Inbound text/binary is ignored; this feed is one-way
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    hub.unsubscribe(session_id).await;
    info!(session_id, "Subscriber disconnected");
}
