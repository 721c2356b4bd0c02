//! Console capture
//!
//! Decorates an abstract logger: the inner logger runs first so local
//! logging is unaffected, then a console event with the level and the
//! call's arguments is submitted.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::event::{Event, LogLevel};
use crate::uplink::EventSink;

/// Abstract console surface.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, args: &[Value]);
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log(&self, level: LogLevel, args: &[Value]) {
        (**self).log(level, args)
    }
}

impl<L: Logger + ?Sized> Logger for Box<L> {
    fn log(&self, level: LogLevel, args: &[Value]) {
        (**self).log(level, args)
    }
}

/// Default inner logger: routes console levels onto `tracing`.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, args: &[Value]) {
        let line = args.iter().map(render_arg).collect::<Vec<_>>().join(" ");
        match level {
            LogLevel::Log | LogLevel::Info => info!(target: "wiretap::console", "{}", line),
            LogLevel::Warn => warn!(target: "wiretap::console", "{}", line),
            LogLevel::Error => error!(target: "wiretap::console", "{}", line),
            LogLevel::Debug => debug!(target: "wiretap::console", "{}", line),
        }
    }
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Console tap: forwards every call to the inner logger unchanged, then
/// submits a console event.
pub struct ConsoleTap<L> {
    inner: L,
    sink: EventSink,
}

impl<L: Logger> ConsoleTap<L> {
    pub fn new(inner: L, sink: EventSink) -> Self {
        Self { inner, sink }
    }

    pub fn log(&self, args: Vec<Value>) {
        self.emit(LogLevel::Log, args);
    }

    pub fn warn(&self, args: Vec<Value>) {
        self.emit(LogLevel::Warn, args);
    }

    pub fn error(&self, args: Vec<Value>) {
        self.emit(LogLevel::Error, args);
    }

    pub fn info(&self, args: Vec<Value>) {
        self.emit(LogLevel::Info, args);
    }

    pub fn debug(&self, args: Vec<Value>) {
        self.emit(LogLevel::Debug, args);
    }

    fn emit(&self, level: LogLevel, args: Vec<Value>) {
        // Original behavior first; capture is a side channel only.
        self.inner.log(level, &args);
        self.sink.submit(&Event::console(level, args));
    }
}

impl<L: Logger> Logger for ConsoleTap<L> {
    fn log(&self, level: LogLevel, args: &[Value]) {
        self.emit(level, args.to_vec());
    }
}
