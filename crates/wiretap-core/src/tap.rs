//! Producer facade
//!
//! Wires the capture taps to the uplink. Console and network capture are
//! independently toggleable; a disabled channel hands the original
//! capability back untouched. Outside development builds the whole tap is
//! inert: nothing is wrapped and nothing connects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::capture::console::{ConsoleTap, Logger};
use crate::capture::network::{EventedClient, EventedTap, HttpClient, NetworkTap};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::uplink::{EventSink, Uplink, UplinkEvent, UplinkOptions};

/// Producer-side configuration
pub struct WiretapOptions {
    /// Relay host
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Capture console calls
    pub enable_console: bool,
    /// Capture network calls
    pub enable_network: bool,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Delivery queue bound while disconnected
    pub queue_capacity: usize,
}

impl Default for WiretapOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8989,
            enable_console: true,
            enable_network: true,
            reconnect_delay: Duration::from_millis(3000),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Producer-side entry point
pub struct Wiretap {
    enable_console: bool,
    enable_network: bool,
    uplink: Option<Uplink>,
    sink: EventSink,
}

impl Wiretap {
    /// Initialize capture and start the uplink. In non-development builds
    /// this returns an inert tap: wrapping is a no-op and no connection is
    /// attempted.
    pub async fn init(options: WiretapOptions) -> anyhow::Result<Self> {
        if !cfg!(debug_assertions) {
            return Ok(Self {
                enable_console: false,
                enable_network: false,
                uplink: None,
                sink: EventSink::detached(),
            });
        }

        let mut uplink = Uplink::new(UplinkOptions {
            url: format!("ws://{}:{}", options.host, options.port),
            reconnect_delay: options.reconnect_delay,
            queue_capacity: options.queue_capacity,
        });
        let sink = uplink.sink();
        uplink.start().await?;

        info!(
            host = %options.host,
            port = options.port,
            console = options.enable_console,
            network = options.enable_network,
            "wiretap initialized"
        );

        Ok(Self {
            enable_console: options.enable_console,
            enable_network: options.enable_network,
            uplink: Some(uplink),
            sink,
        })
    }

    /// Submit handle for custom instrumentation
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Decorate a logger, or return it untouched when console capture is
    /// disabled.
    pub fn wrap_logger(&self, inner: Arc<dyn Logger>) -> Arc<dyn Logger> {
        if self.enable_console {
            Arc::new(ConsoleTap::new(inner, self.sink.clone()))
        } else {
            inner
        }
    }

    /// Decorate a promise-style network client, or return it untouched
    /// when network capture is disabled.
    pub fn wrap_client(&self, inner: Arc<dyn HttpClient>) -> Arc<dyn HttpClient> {
        if self.enable_network {
            Arc::new(NetworkTap::new(inner, self.sink.clone()))
        } else {
            inner
        }
    }

    /// Decorate a callback-style network client, or return it untouched
    /// when network capture is disabled.
    pub fn wrap_evented(&self, inner: Arc<dyn EventedClient>) -> Arc<dyn EventedClient> {
        if self.enable_network {
            Arc::new(EventedTap::new(inner, self.sink.clone()))
        } else {
            inner
        }
    }

    /// Connection lifecycle events, when the uplink is running.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<UplinkEvent>> {
        self.uplink.as_ref().map(|u| u.subscribe())
    }

    /// Close the connection and suppress further reconnection. The sole
    /// external terminal action; capture keeps working but frames go
    /// nowhere afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(uplink) = self.uplink.as_mut() {
            uplink.disconnect().await;
        }
    }
}
