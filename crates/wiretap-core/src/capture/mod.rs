//! Capture taps
//!
//! Transparent decorators over the console and network surfaces. Each tap
//! wraps the original capability at composition time: the wrapped call's
//! behavior, return value, and failure outcome are unchanged for the
//! caller, and a structured event is submitted on the side. No global
//! state is mutated and nothing needs restoring on teardown.

pub mod console;
pub mod network;

pub use console::{ConsoleTap, Logger, TracingLogger};
pub use network::{
    CompletedResponse, EventedClient, EventedHandlers, EventedTap, HttpClient, HttpExchange,
    HttpRequest, NetworkTap, ResponseHead,
};
