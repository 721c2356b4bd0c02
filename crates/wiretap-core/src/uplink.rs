//! Uplink - producer-side connection manager
//!
//! Owns the single outbound WebSocket to the relay. Frames submitted while
//! the connection is open are transmitted immediately in submission order;
//! frames submitted while disconnected land in the bounded delivery queue.
//! Every connection loss schedules a reconnect after a fixed delay,
//! indefinitely, until [`Uplink::disconnect`] is called.
//!
//! On each successful connect the queue is drained as a whole before any
//! frame captured during the drain, preserving a single global FIFO order
//! per connection lifetime.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::event::Event;
use crate::queue::{DeliveryQueue, DEFAULT_QUEUE_CAPACITY};

/// Uplink options
pub struct UplinkOptions {
    /// Relay URL (e.g., ws://127.0.0.1:8989)
    pub url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Delivery queue bound while disconnected
    pub queue_capacity: usize,
}

impl Default for UplinkOptions {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8989".to_string(),
            reconnect_delay: Duration::from_millis(3000),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkEvent {
    Connected,
    Disconnected,
}

/// Cheap clonable submit handle handed to the capture taps. Submission
/// never blocks and never surfaces transport errors to the caller.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<String>,
}

impl EventSink {
    pub fn submit(&self, event: &Event) {
        let _ = self.tx.send(event.to_wire());
    }

    /// Detached sink whose frames go nowhere. Used when capture is enabled
    /// but transmission is not (non-development builds).
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Standalone sink with an inspectable receiving end.
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

enum PumpExit {
    Shutdown,
    ConnectionLost,
}

/// Producer-side connection manager
pub struct Uplink {
    options: UplinkOptions,
    submit_tx: mpsc::UnboundedSender<String>,
    submit_rx: Option<mpsc::UnboundedReceiver<String>>,
    event_tx: broadcast::Sender<UplinkEvent>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Uplink {
    /// Create a new uplink
    pub fn new(options: UplinkOptions) -> Self {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        Self {
            options,
            submit_tx,
            submit_rx: Some(submit_rx),
            event_tx,
            shutdown_tx: None,
        }
    }

    /// Submit handle for capture taps
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.submit_tx.clone(),
        }
    }

    /// Subscribe to connection lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<UplinkEvent> {
        self.event_tx.subscribe()
    }

    /// Start the connect/reconnect loop
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.options.url.is_empty() {
            return Err(anyhow::anyhow!("no relay URL configured"));
        }
        let submit_rx = self
            .submit_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("uplink already started"))?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let url = self.options.url.clone();
        let delay = self.options.reconnect_delay;
        let queue = DeliveryQueue::new(self.options.queue_capacity);
        let event_tx = self.event_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(Self::run(url, delay, queue, submit_rx, event_tx, shutdown_rx));

        Ok(())
    }

    /// Close the connection and suppress further reconnection. Capture
    /// continues; frames submitted afterwards are silently dropped.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        info!("uplink disconnected");
    }

    async fn run(
        url: String,
        delay: Duration,
        mut queue: DeliveryQueue,
        mut submit_rx: mpsc::UnboundedReceiver<String>,
        event_tx: broadcast::Sender<UplinkEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let attempt = connect_async(url.as_str());
            tokio::pin!(attempt);

            // Frames captured while the attempt is in flight go into the
            // bounded queue, same as during the retry delay. A connect
            // attempt against an unreachable host can outlast several
            // delay periods.
            let outcome = loop {
                tokio::select! {
                    outcome = &mut attempt => break outcome,
                    frame = submit_rx.recv() => match frame {
                        Some(frame) => queue.push(frame),
                        None => return,
                    },
                    _ = shutdown_rx.recv() => return,
                }
            };

            match outcome {
                Ok((ws_stream, _)) => {
                    info!(url = %url, "uplink connected");
                    let _ = event_tx.send(UplinkEvent::Connected);

                    let exit =
                        Self::pump(ws_stream, &mut submit_rx, &mut queue, &mut shutdown_rx).await;
                    let _ = event_tx.send(UplinkEvent::Disconnected);

                    if matches!(exit, PumpExit::Shutdown) {
                        return;
                    }
                    warn!(queued = queue.len(), "uplink connection lost, reconnecting");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "uplink connect failed");
                }
            }

            // Fixed-delay wait before the next attempt; frames captured
            // meanwhile go into the bounded queue.
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    frame = submit_rx.recv() => match frame {
                        Some(frame) => queue.push(frame),
                        None => return,
                    },
                    _ = shutdown_rx.recv() => return,
                }
            }
        }
    }

    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        submit_rx: &mut mpsc::UnboundedReceiver<String>,
        queue: &mut DeliveryQueue,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> PumpExit {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // Frames that raced the handshake were captured while disconnected
        // and belong to the connect-time cohort.
        while let Ok(frame) = submit_rx.try_recv() {
            queue.push(frame);
        }

        // Drain the whole cohort before anything captured after connect.
        while let Some(frame) = queue.pop() {
            if let Err(e) = ws_tx.send(Message::Text(frame.clone())).await {
                warn!(error = %e, pending = queue.len() + 1, "uplink send failed mid-drain");
                queue.restore(frame);
                return PumpExit::ConnectionLost;
            }
        }

        loop {
            tokio::select! {
                frame = submit_rx.recv() => {
                    let frame = match frame {
                        Some(f) => f,
                        None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return PumpExit::Shutdown;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(frame.clone())).await {
                        warn!(error = %e, "uplink send failed");
                        queue.push(frame);
                        return PumpExit::ConnectionLost;
                    }
                }

                // Viewer-to-producer traffic is ignored; the stream is only
                // watched for close and errors.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => return PumpExit::ConnectionLost,
                        Some(Err(e)) => {
                            warn!(error = %e, "uplink websocket error");
                            return PumpExit::ConnectionLost;
                        }
                        _ => {}
                    }
                }

                _ = shutdown_rx.recv() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use crate::relay::{Relay, RelayOptions};
    use serde_json::json;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(3);

    fn options(port: u16, capacity: usize) -> UplinkOptions {
        UplinkOptions {
            url: format!("ws://127.0.0.1:{}", port),
            reconnect_delay: Duration::from_millis(300),
            queue_capacity: capacity,
        }
    }

    fn marker(text: &str) -> Event {
        Event::console(LogLevel::Log, vec![json!(text)])
    }

    /// Bind and drop an ephemeral port so nothing listens on it yet.
    async fn reserve_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn start_relay(port: u16) -> (Relay, u16) {
        let mut relay = Relay::new(RelayOptions {
            host: "127.0.0.1".to_string(),
            port,
        });
        relay.start().await.unwrap();
        let bound = relay.bound_port().unwrap();
        (relay, bound)
    }

    async fn connect_viewer(
        port: u16,
    ) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}", port))
            .await
            .unwrap();
        ws
    }

    async fn expect_frame(
        viewer: &mut (impl futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) -> String {
        match timeout(RECV_TIMEOUT, viewer.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    async fn wait_for(rx: &mut broadcast::Receiver<UplinkEvent>, wanted: UplinkEvent) {
        loop {
            match timeout(RECV_TIMEOUT, rx.recv()).await {
                Ok(Ok(event)) if event == wanted => return,
                Ok(Ok(_)) => continue,
                other => panic!("waiting for {:?}, got {:?}", wanted, other),
            }
        }
    }

    #[tokio::test]
    async fn test_sends_immediately_while_open() {
        let (_relay, port) = start_relay(0).await;
        let mut viewer = connect_viewer(port).await;

        let mut uplink = Uplink::new(options(port, 100));
        let mut events = uplink.subscribe();
        let sink = uplink.sink();
        uplink.start().await.unwrap();
        wait_for(&mut events, UplinkEvent::Connected).await;

        sink.submit(&marker("live"));
        assert!(expect_frame(&mut viewer).await.contains("live"));
    }

    #[tokio::test]
    async fn test_reconnects_and_drains_queue_in_order() {
        // Nothing listens here yet; the first attempts must be refused.
        let port = reserve_port().await;

        let mut uplink = Uplink::new(options(port, 100));
        let mut events = uplink.subscribe();
        let sink = uplink.sink();
        uplink.start().await.unwrap();

        sink.submit(&marker("m1"));
        sink.submit(&marker("m2"));
        sink.submit(&marker("m3"));

        // Let at least one fixed-delay attempt fail before the relay is up.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let (_relay, bound) = start_relay(port).await;
        assert_eq!(bound, port);
        let mut viewer = connect_viewer(port).await;

        wait_for(&mut events, UplinkEvent::Connected).await;

        assert!(expect_frame(&mut viewer).await.contains("m1"));
        assert!(expect_frame(&mut viewer).await.contains("m2"));
        assert!(expect_frame(&mut viewer).await.contains("m3"));

        // New sends after the drain go out immediately, after the cohort.
        sink.submit(&marker("m4"));
        assert!(expect_frame(&mut viewer).await.contains("m4"));
    }

    #[tokio::test]
    async fn test_eviction_applies_while_disconnected() {
        let port = reserve_port().await;

        let mut uplink = Uplink::new(options(port, 3));
        let mut events = uplink.subscribe();
        let sink = uplink.sink();
        uplink.start().await.unwrap();

        for m in ["m1", "m2", "m3", "m4", "m5"] {
            sink.submit(&marker(m));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        let (_relay, _) = start_relay(port).await;
        let mut viewer = connect_viewer(port).await;
        wait_for(&mut events, UplinkEvent::Connected).await;

        // Capacity 3: the oldest two were evicted, the rest kept in order.
        assert!(expect_frame(&mut viewer).await.contains("m3"));
        assert!(expect_frame(&mut viewer).await.contains("m4"));
        assert!(expect_frame(&mut viewer).await.contains("m5"));
    }

    #[tokio::test]
    async fn test_eviction_applies_during_pending_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut uplink = Uplink::new(options(port, 3));
        let sink = uplink.sink();
        uplink.start().await.unwrap();

        // Accept the socket but withhold the upgrade response, keeping
        // the connect attempt in flight while frames arrive.
        let (stream, _) = timeout(RECV_TIMEOUT, listener.accept()).await.unwrap().unwrap();
        for m in ["m1", "m2", "m3", "m4", "m5"] {
            sink.submit(&marker(m));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Finish the handshake; only the capacity-bounded tail drains.
        let mut server = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert!(expect_frame(&mut server).await.contains("m3"));
        assert!(expect_frame(&mut server).await.contains("m4"));
        assert!(expect_frame(&mut server).await.contains("m5"));
    }

    #[tokio::test]
    async fn test_disconnect_suppresses_reconnection() {
        let (_relay, port) = start_relay(0).await;

        let mut uplink = Uplink::new(options(port, 100));
        let mut events = uplink.subscribe();
        uplink.start().await.unwrap();
        wait_for(&mut events, UplinkEvent::Connected).await;

        uplink.disconnect().await;
        wait_for(&mut events, UplinkEvent::Disconnected).await;

        // Well past the reconnect delay: no new connection may appear.
        let reconnected = timeout(Duration::from_millis(800), events.recv()).await;
        assert!(
            reconnected.is_err(),
            "uplink reconnected after disconnect: {:?}",
            reconnected
        );
    }
}
