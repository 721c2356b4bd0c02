//! Wire event model
//!
//! Mirrors the JSON frames exchanged between producer and viewer:
//!
//! - `{ channel: "console", type: <level>, args, timestamp }`
//! - `{ channel: "network", type: "request" | "response" | "error", ... }`
//!
//! Events are immutable once constructed; a later event correlated by the
//! same request id replaces an earlier one on the consumer side, never here.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Console log level, doubles as the `type` discriminant on console frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "log" => Some(LogLevel::Log),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// A captured console call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEvent {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub args: Vec<Value>,
    pub timestamp: String,
}

/// One lifecycle event of a network call. All events for one logical call
/// share the same `id`. A successful promise-style call emits `response`
/// twice: first with an empty body placeholder, then with the full body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkEvent {
    Request {
        id: String,
        url: String,
        method: String,
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        timestamp: String,
    },
    Response {
        id: String,
        url: String,
        status: u16,
        #[serde(rename = "statusText")]
        status_text: String,
        headers: HashMap<String, String>,
        body: String,
        /// Milliseconds elapsed since request initiation.
        duration: u64,
        timestamp: String,
    },
    Error {
        id: String,
        url: String,
        error: String,
        duration: u64,
        timestamp: String,
    },
}

/// The unit transmitted over the wire, tagged by `channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum Event {
    Console(ConsoleEvent),
    Network(NetworkEvent),
}

impl Event {
    pub fn console(level: LogLevel, args: Vec<Value>) -> Self {
        Event::Console(ConsoleEvent {
            level,
            args,
            timestamp: now_iso(),
        })
    }

    pub fn network_request(
        id: &str,
        url: &str,
        method: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Self {
        Event::Network(NetworkEvent::Request {
            id: id.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            headers,
            body,
            timestamp: now_iso(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn network_response(
        id: &str,
        url: &str,
        status: u16,
        status_text: &str,
        headers: HashMap<String, String>,
        body: String,
        duration_ms: u64,
    ) -> Self {
        Event::Network(NetworkEvent::Response {
            id: id.to_string(),
            url: url.to_string(),
            status,
            status_text: status_text.to_string(),
            headers,
            body,
            duration: duration_ms,
            timestamp: now_iso(),
        })
    }

    pub fn network_error(id: &str, url: &str, error: &str, duration_ms: u64) -> Self {
        Event::Network(NetworkEvent::Error {
            id: id.to_string(),
            url: url.to_string(),
            error: error.to_string(),
            duration: duration_ms,
            timestamp: now_iso(),
        })
    }

    /// Serialize for transmission. Never fails: a serialization error
    /// degrades to a stringified form of the event instead of dropping it.
    pub fn to_wire(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(err) => {
                debug!(error = %err, "event serialization failed, sending string form");
                self.degraded_wire()
            }
        }
    }

    /// Stringified frame keeping the channel, type and correlation fields
    /// so a viewer can still slot it into the right place.
    fn degraded_wire(&self) -> String {
        let fallback = match self {
            Event::Console(c) => json!({
                "channel": "console",
                "type": c.level.as_str(),
                "args": c.args.iter().map(|a| Value::String(a.to_string())).collect::<Vec<_>>(),
                "timestamp": c.timestamp,
            }),
            Event::Network(n) => {
                let (kind, id, url) = match n {
                    NetworkEvent::Request { id, url, .. } => ("request", id, url),
                    NetworkEvent::Response { id, url, .. } => ("response", id, url),
                    NetworkEvent::Error { id, url, .. } => ("error", id, url),
                };
                json!({
                    "channel": "network",
                    "type": kind,
                    "id": id,
                    "url": url,
                    "detail": format!("{:?}", n),
                    "timestamp": now_iso(),
                })
            }
        };
        fallback.to_string()
    }
}

/// Correlation id for one logical network call: high-resolution timestamp
/// plus a random component, unique for the lifetime of the process.
pub fn next_request_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
