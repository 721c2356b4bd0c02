//! Network capture
//!
//! Two transparent decorators over abstract network clients:
//!
//! - [`NetworkTap`] wraps a promise-style [`HttpClient`] (fetch-like,
//!   two-phase response: head first, body on a later await).
//! - [`EventedTap`] wraps a callback-style [`EventedClient`] (XHR-like,
//!   body fully available at the completion signal).
//!
//! Every logical call gets one correlation id shared by its request,
//! response and error events. Emission follows an explicit per-request
//! state machine: `Opened -> HeadersReceived -> BodyReceived`, or
//! `Opened -> Failed`; the second response event is only reachable from
//! `HeadersReceived`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::event::{next_request_id, Event};
use crate::uplink::EventSink;

/// A request handed to the abstract client.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// Status line and headers, available before the body has been read.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
}

/// Body errors travel as strings so the future stays clonable; the tap
/// swallows them anyway (a body-read failure means no further event).
pub type SharedBody = Shared<BoxFuture<'static, Result<String, String>>>;

/// Two-phase response: head now, body on a later await. The body future is
/// shared so the caller and the tap consume the same read.
pub struct HttpExchange {
    pub head: ResponseHead,
    body: SharedBody,
}

impl std::fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExchange")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl HttpExchange {
    pub fn new(head: ResponseHead, body: BoxFuture<'static, Result<String, String>>) -> Self {
        Self {
            head,
            body: body.shared(),
        }
    }

    /// Exchange whose body is already fully available.
    pub fn ready(head: ResponseHead, body: String) -> Self {
        Self::new(head, async move { Ok(body) }.boxed())
    }

    pub fn body(&self) -> SharedBody {
        self.body.clone()
    }

    /// Await the full body.
    pub async fn text(&self) -> Result<String, String> {
        self.body.clone().await
    }
}

/// Promise-style network client (fetch-like).
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, anyhow::Result<HttpExchange>>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, anyhow::Result<HttpExchange>> {
        (**self).execute(request)
    }
}

/// Emission state for one logical call. Guards against a second response
/// event ever being produced without the first, or after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangePhase {
    Opened,
    HeadersReceived,
    BodyReceived,
    Failed,
}

#[derive(Debug)]
struct ExchangeState {
    phase: ExchangePhase,
}

impl ExchangeState {
    fn new() -> Self {
        Self {
            phase: ExchangePhase::Opened,
        }
    }

    fn headers_received(&mut self) -> bool {
        if self.phase == ExchangePhase::Opened {
            self.phase = ExchangePhase::HeadersReceived;
            true
        } else {
            false
        }
    }

    fn body_received(&mut self) -> bool {
        if self.phase == ExchangePhase::HeadersReceived {
            self.phase = ExchangePhase::BodyReceived;
            true
        } else {
            false
        }
    }

    fn failed(&mut self) -> bool {
        if self.phase == ExchangePhase::Opened {
            self.phase = ExchangePhase::Failed;
            true
        } else {
            false
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Promise-style tap. Emits `request` when the call is initiated, the
/// first `response` as soon as the head arrives (empty body placeholder),
/// the second `response` once the body has been read, and `error` with the
/// original failure re-raised unchanged.
pub struct NetworkTap<C> {
    inner: C,
    sink: EventSink,
}

impl<C: HttpClient> NetworkTap<C> {
    pub fn new(inner: C, sink: EventSink) -> Self {
        Self { inner, sink }
    }
}

impl<C: HttpClient> HttpClient for NetworkTap<C> {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, anyhow::Result<HttpExchange>> {
        let sink = self.sink.clone();
        let id = next_request_id();
        let started = Instant::now();
        let mut state = ExchangeState::new();

        // Emitted synchronously, before delegating.
        sink.submit(&Event::network_request(
            &id,
            &request.url,
            &request.method,
            request.headers.clone(),
            request.body.clone(),
        ));

        let url = request.url.clone();
        let inner = self.inner.execute(request);

        async move {
            match inner.await {
                Ok(exchange) => {
                    if state.headers_received() {
                        sink.submit(&Event::network_response(
                            &id,
                            &url,
                            exchange.head.status,
                            &exchange.head.status_text,
                            exchange.head.headers.clone(),
                            String::new(),
                            elapsed_ms(started),
                        ));
                    }

                    // Second response once the body is available, off the
                    // caller's path. A body-read failure ends the exchange
                    // with no further event.
                    let head = exchange.head.clone();
                    let body = exchange.body();
                    tokio::spawn(async move {
                        if let Ok(text) = body.await {
                            if state.body_received() {
                                sink.submit(&Event::network_response(
                                    &id,
                                    &url,
                                    head.status,
                                    &head.status_text,
                                    head.headers,
                                    text,
                                    elapsed_ms(started),
                                ));
                            }
                        }
                    });

                    Ok(exchange)
                }
                Err(e) => {
                    if state.failed() {
                        sink.submit(&Event::network_error(
                            &id,
                            &url,
                            &e.to_string(),
                            elapsed_ms(started),
                        ));
                    }
                    // The original failure propagates unchanged.
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

/// Fully-available response delivered to the load handler.
#[derive(Debug, Clone)]
pub struct CompletedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Completion callbacks, XHR-style.
pub struct EventedHandlers {
    pub on_load: Box<dyn FnOnce(CompletedResponse) + Send>,
    pub on_error: Box<dyn FnOnce(String) + Send>,
}

/// Callback-style network client (XHR-like).
pub trait EventedClient: Send + Sync {
    fn send(&self, request: HttpRequest, handlers: EventedHandlers);
}

impl<C: EventedClient + ?Sized> EventedClient for Arc<C> {
    fn send(&self, request: HttpRequest, handlers: EventedHandlers) {
        (**self).send(request, handlers)
    }
}

/// Callback-style tap. Emits `request` at send time (not at construction),
/// a single `response` on the load signal, a single `error` on the error
/// signal, then invokes the original handler.
pub struct EventedTap<C> {
    inner: C,
    sink: EventSink,
}

impl<C: EventedClient> EventedTap<C> {
    pub fn new(inner: C, sink: EventSink) -> Self {
        Self { inner, sink }
    }
}

impl<C: EventedClient> EventedClient for EventedTap<C> {
    fn send(&self, request: HttpRequest, handlers: EventedHandlers) {
        let id = next_request_id();
        let started = Instant::now();

        self.sink.submit(&Event::network_request(
            &id,
            &request.url,
            &request.method,
            request.headers.clone(),
            request.body.clone(),
        ));

        let url = request.url.clone();
        let load_sink = self.sink.clone();
        let load_id = id.clone();
        let load_url = url.clone();
        let error_sink = self.sink.clone();
        let EventedHandlers { on_load, on_error } = handlers;

        let wrapped = EventedHandlers {
            on_load: Box::new(move |response: CompletedResponse| {
                load_sink.submit(&Event::network_response(
                    &load_id,
                    &load_url,
                    response.status,
                    &response.status_text,
                    response.headers.clone(),
                    response.body.clone(),
                    elapsed_ms(started),
                ));
                on_load(response);
            }),
            on_error: Box::new(move |error: String| {
                error_sink.submit(&Event::network_error(
                    &id,
                    &url,
                    &error,
                    elapsed_ms(started),
                ));
                on_error(error);
            }),
        };

        self.inner.send(request, wrapped);
    }
}
