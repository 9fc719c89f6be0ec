//! Span handling and W3C trace context propagation.
//!
//! The engine only needs to start spans, record errors on them, and move
//! trace context in and out of HTTP headers. [`OtelPropagator`] does that with
//! OpenTelemetry; [`NoopPropagator`] is used when tracing is disabled.

use axum::http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;

pub const TRACE_PARENT: &str = "traceparent";
pub const TRACE_STATE: &str = "tracestate";

/// Starts spans and carries trace context across service boundaries.
pub trait TracePropagator: Send + Sync {
    /// Whether spans are recorded and headers injected.
    fn is_active(&self) -> bool;

    /// Read the caller's trace context from inbound headers.
    fn extract(&self, headers: &HeaderMap) -> Context;

    /// Start a span as a child of `parent`.
    fn start_span(&self, parent: &Context, name: String) -> ActiveSpan;

    /// Trace headers for an outbound call made within `cx`.
    fn inject(&self, cx: &Context) -> HashMap<String, String>;
}

/// A started span. The span ends when the handle is dropped.
#[derive(Debug)]
pub struct ActiveSpan {
    cx: Context,
    owned: bool,
}

impl ActiveSpan {
    /// Handle that records nothing.
    pub fn noop() -> Self {
        Self {
            cx: Context::new(),
            owned: false,
        }
    }

    /// Context carrying this span, for child spans and header injection.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Record an error and mark the span failed.
    pub fn record_error(&self, err: &(dyn std::error::Error + 'static)) {
        if !self.owned {
            return;
        }
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }

    /// Record an error given only as text and mark the span failed.
    pub fn record_message(&self, message: &str) {
        if !self.owned {
            return;
        }
        let span = self.cx.span();
        span.add_event(
            "exception",
            vec![KeyValue::new("exception.message", message.to_string())],
        );
        span.set_status(Status::error(message.to_string()));
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if self.owned {
            self.cx.span().end();
        }
    }
}

/// Span name for a URI: `/orders/list` under `checkout` becomes
/// `checkout.orders.list`.
pub fn span_name(service_name: &str, uri: &str) -> String {
    let dotted = uri.replace('/', ".");
    format!("{}.{}", service_name, dotted.strip_prefix('.').unwrap_or(&dotted))
}

/// OpenTelemetry-backed propagator using W3C trace context.
pub struct OtelPropagator<T> {
    tracer: T,
    propagator: TraceContextPropagator,
}

impl<T> OtelPropagator<T> {
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            propagator: TraceContextPropagator::new(),
        }
    }
}

impl<T> TracePropagator for OtelPropagator<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    fn is_active(&self) -> bool {
        true
    }

    fn extract(&self, headers: &HeaderMap) -> Context {
        let carrier: HashMap<String, String> = [TRACE_PARENT, TRACE_STATE]
            .into_iter()
            .filter_map(|name| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        self.propagator.extract(&carrier)
    }

    fn start_span(&self, parent: &Context, name: String) -> ActiveSpan {
        let span = self.tracer.start_with_context(name, parent);
        ActiveSpan {
            cx: parent.with_span(span),
            owned: true,
        }
    }

    fn inject(&self, cx: &Context) -> HashMap<String, String> {
        let mut carrier = HashMap::new();
        self.propagator.inject_context(cx, &mut carrier);
        carrier.retain(|name, value| match name.as_str() {
            TRACE_PARENT => !value.is_empty(),
            TRACE_STATE => true,
            _ => false,
        });
        carrier
    }
}

/// Propagator used when tracing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPropagator;

impl TracePropagator for NoopPropagator {
    fn is_active(&self) -> bool {
        false
    }

    fn extract(&self, _headers: &HeaderMap) -> Context {
        Context::new()
    }

    fn start_span(&self, _parent: &Context, _name: String) -> ActiveSpan {
        ActiveSpan::noop()
    }

    fn inject(&self, _cx: &Context) -> HashMap<String, String> {
        HashMap::new()
    }
}
