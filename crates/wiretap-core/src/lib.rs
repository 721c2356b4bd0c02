//! wiretap - remote console/network event pipeline
//!
//! Streams an instrumented application's console output and HTTP traffic to
//! a separate viewer process in near real time, with no debugger protocol.
//!
//! # Architecture
//!
//! ```text
//! Instrumented app                 Relay               Viewer
//!       │                            │                    │
//! capture taps ──► event ──► uplink ─┼──► fanout ────────►│
//!  (console,       model    (queue +  │   (all other       │
//!   network)               reconnect) │    connections)    │
//! ```
//!
//! The relay is a stateless broadcaster: every inbound frame goes verbatim
//! to all *other* open connections. The producer side captures console and
//! network activity through decorator taps, serializes events, buffers them
//! in a bounded FIFO while disconnected, and drains the buffer on every
//! successful (re)connect.

pub mod capture;
pub mod event;
pub mod queue;
pub mod relay;
pub mod tap;
pub mod uplink;

pub use capture::console::{ConsoleTap, Logger, TracingLogger};
pub use capture::network::{
    CompletedResponse, EventedClient, EventedHandlers, EventedTap, HttpClient, HttpExchange,
    HttpRequest, NetworkTap, ResponseHead,
};
pub use event::{Event, LogLevel, NetworkEvent};
pub use queue::{DeliveryQueue, DEFAULT_QUEUE_CAPACITY};
pub use relay::{Relay, RelayOptions};
pub use tap::{Wiretap, WiretapOptions};
pub use uplink::{EventSink, Uplink, UplinkEvent, UplinkOptions};
