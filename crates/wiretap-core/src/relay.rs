//! Transport relay
//!
//! A stateless WebSocket broadcaster: every frame received from one
//! connection is forwarded verbatim to all *other* open connections, never
//! back to its sender. The relay keeps no history and no identity beyond a
//! per-connection id used for origin exclusion on the internal fanout.
//!
//! The same listener answers plain HTTP requests (no websocket upgrade)
//! with a trivial liveness response.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

/// How many consecutive ports to try when the configured one is occupied.
const MAX_BIND_ATTEMPTS: u16 = 16;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Relay server options
pub struct RelayOptions {
    /// Interface to listen on
    pub host: String,
    /// Port to listen on; on bind conflict the next higher port is tried
    pub port: u16,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8989,
        }
    }
}

/// Transport relay server
pub struct Relay {
    host: String,
    port: u16,
    bound_port: Option<u16>,
    /// Fanout of inbound frames, tagged with the originating connection id
    fanout_tx: broadcast::Sender<(u64, Message)>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Relay {
    /// Create a new relay
    pub fn new(options: RelayOptions) -> Self {
        let (fanout_tx, _) = broadcast::channel(1024);
        Self {
            host: options.host,
            port: options.port,
            bound_port: None,
            fanout_tx,
            shutdown_tx: None,
        }
    }

    /// Port actually bound, once started. Differs from the configured port
    /// after a bind conflict (or when configured as 0).
    pub fn bound_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Start the relay server
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        let bound_port = listener.local_addr()?.port();
        self.bound_port = Some(bound_port);

        info!(port = bound_port, "relay listening");

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let fanout_tx = self.fanout_tx.clone();

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let fanout_tx = fanout_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = Self::handle_connection(stream, addr, fanout_tx).await {
                                        error!(?e, ?addr, "relay connection error");
                                    }
                                });
                            }
                            Err(e) => {
                                error!(?e, "failed to accept relay connection");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("relay shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the relay server
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        info!("relay stopped");
    }

    async fn bind(&self) -> anyhow::Result<TcpListener> {
        for offset in 0..MAX_BIND_ATTEMPTS {
            let candidate = match self.port.checked_add(offset) {
                Some(p) => p,
                None => break,
            };
            match TcpListener::bind((self.host.as_str(), candidate)).await {
                Ok(listener) => {
                    if offset > 0 {
                        warn!(
                            configured = self.port,
                            bound = candidate,
                            "configured port occupied, bound next free port"
                        );
                    }
                    return Ok(listener);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(anyhow::anyhow!(
            "no free port in {}..{}",
            self.port,
            self.port.saturating_add(MAX_BIND_ATTEMPTS)
        ))
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        fanout_tx: broadcast::Sender<(u64, Message)>,
    ) -> anyhow::Result<()> {
        if !Self::is_websocket_upgrade(&stream).await? {
            return Self::answer_liveness_probe(stream, addr).await;
        }

        let ws_stream = accept_async(stream).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let mut fanout_rx = fanout_tx.subscribe();

        info!(?addr, conn_id, "relay client connected");

        loop {
            tokio::select! {
                // Fanout -> this client
                frame = fanout_rx.recv() => {
                    let (origin, msg) = match frame {
                        Ok(f) => f,
                        // Lagged peers silently miss frames; the relay is
                        // strictly best-effort with no history.
                        Err(_) => continue,
                    };

                    if origin == conn_id {
                        continue;
                    }

                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }

                // This client -> fanout
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(msg @ Message::Text(_))) | Some(Ok(msg @ Message::Binary(_))) => {
                            // Forwarded verbatim; content is opaque here.
                            let _ = fanout_tx.send((conn_id, msg));
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(?addr, conn_id, error = %e, "relay websocket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Dropping fanout_rx removes this connection from the session set;
        // peers get no notification.
        info!(?addr, conn_id, "relay client disconnected");
        Ok(())
    }

    /// Peek the request head without consuming it and look for a websocket
    /// upgrade. Anything else is treated as a liveness probe.
    async fn is_websocket_upgrade(stream: &TcpStream) -> anyhow::Result<bool> {
        let mut buf = [0u8; 2048];
        for _ in 0..500 {
            let n = stream.peek(&mut buf).await?;
            if n == 0 {
                return Ok(false);
            }
            let complete = buf[..n].windows(4).any(|w| w == b"\r\n\r\n");
            if complete || n == buf.len() {
                let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
                return Ok(head.contains("upgrade: websocket"));
            }
            // Partial request head; wait for the rest to arrive.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(anyhow::anyhow!("no complete request head received"))
    }

    async fn answer_liveness_probe(mut stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        let mut buf = [0u8; 2048];
        let _ = stream.read(&mut buf).await?;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: text/plain\r\n\
                  Content-Length: 3\r\n\
                  Connection: close\r\n\
                  \r\n\
                  ok\n",
            )
            .await?;
        let _ = stream.shutdown().await;
        info!(?addr, "answered liveness probe");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    async fn start_relay(port: u16) -> Relay {
        let mut relay = Relay::new(RelayOptions {
            host: "127.0.0.1".to_string(),
            port,
        });
        relay.start().await.unwrap();
        relay
    }

    async fn connect(port: u16) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<TcpStream>,
    > {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}", port))
            .await
            .unwrap();
        ws
    }

    async fn expect_text(
        ws: &mut (impl futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) -> String {
        match timeout(RECV_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcasts_to_all_other_peers_never_sender() {
        let relay = start_relay(0).await;
        let port = relay.bound_port().unwrap();

        let mut a = connect(port).await;
        let mut b = connect(port).await;
        let mut c = connect(port).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Malformed JSON on purpose: the relay forwards frames verbatim.
        let payload = "not json {{{";
        a.send(Message::Text(payload.to_string())).await.unwrap();

        assert_eq!(expect_text(&mut b).await, payload);
        assert_eq!(expect_text(&mut c).await, payload);

        // The sender must never see its own frame.
        let echo = timeout(Duration::from_millis(300), a.next()).await;
        assert!(echo.is_err(), "sender received its own frame: {:?}", echo);
    }

    #[tokio::test]
    async fn test_peer_failure_does_not_abort_fanout() {
        let relay = start_relay(0).await;
        let port = relay.bound_port().unwrap();

        let mut a = connect(port).await;
        let b = connect(port).await;
        let mut c = connect(port).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // B drops without a close handshake; C must still get the frame.
        drop(b);
        tokio::time::sleep(Duration::from_millis(100)).await;

        a.send(Message::Text("still here".to_string()))
            .await
            .unwrap();
        assert_eq!(expect_text(&mut c).await, "still here");
    }

    #[tokio::test]
    async fn test_occupied_port_falls_back_to_next() {
        let first = start_relay(0).await;
        let taken = first.bound_port().unwrap();

        let second = start_relay(taken).await;
        assert_eq!(second.bound_port().unwrap(), taken + 1);
    }

    #[tokio::test]
    async fn test_liveness_probe_answers_http() {
        let relay = start_relay(0).await;
        let port = relay.bound_port().unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        timeout(RECV_TIMEOUT, stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();

        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.ends_with("ok\n"), "{}", response);
    }
}
