//! Span-scoped request instrumentation
//!
//! Every handler invocation runs inside one server span:
//!
//! 1. the parent context is extracted from the request headers,
//! 2. a `request` span is created with the operation name, the route
//!    template and one attribute per path parameter,
//! 3. the handler runs inside the span and receives a [`RequestContext`],
//! 4. the outcome is recorded as the span status,
//! 5. a [`SpanScope`] guard closes the span on every exit path.
//!
//! # Span fields
//!
//! | Field | Description | Example |
//! |-------|-------------|---------|
//! | `otel.name` | Operation name | `get_user_greeting` |
//! | `otel.kind` | Span kind | `server` |
//! | `http.route` | Route template | `/simple-return/:user` |
//! | `http.route.param.<name>` | Decoded path parameter | `alice` |
//! | `otel.status_code` | `ok` or `error` | `error` |
//! | `otel.status_description` | Error description | `user name must not be empty` |

use crate::router::PathParams;
use crate::telemetry::log;
use crate::telemetry::TelemetryState;
use hyper::header::HeaderMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::field::Empty;
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Status message recorded when a span closes without an outcome
pub const ABORTED_MESSAGE: &str = "request aborted before completion";

/// Prefix of the per-parameter span attributes
pub const ROUTE_PARAM_PREFIX: &str = "http.route.param.";

/// Wraps handler invocations in server spans
#[derive(Debug, Clone)]
pub struct RequestInstrumentor {
    telemetry: Arc<TelemetryState>,
}

impl RequestInstrumentor {
    pub fn new(telemetry: Arc<TelemetryState>) -> Self {
        Self { telemetry }
    }

    /// Create the request span without entering it.
    ///
    /// The parent is the remote span described by `headers`; missing or
    /// malformed trace headers make the span a root.
    pub fn start_span(
        &self,
        operation: &'static str,
        route: &'static str,
        headers: &HeaderMap,
        params: &PathParams,
    ) -> Span {
        let parent = self.telemetry.propagator().extract(headers);

        let span = tracing::info_span!(
            "request",
            otel.name = operation,
            otel.kind = "server",
            http.route = route,
            otel.status_code = Empty,
            otel.status_description = Empty,
        );
        // Fails only when the span is disabled
        let _ = span.set_parent(parent);

        for (name, value) in params.iter() {
            span.set_attribute(format!("{}{}", ROUTE_PARAM_PREFIX, name), value.to_string());
        }

        span
    }

    /// Run `handler` inside a fresh request span.
    ///
    /// The handler's result is returned unchanged. An `Err` is recorded as
    /// the span status and logged with the trace ids of the span.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &'static str,
        route: &'static str,
        headers: &HeaderMap,
        params: &PathParams,
        handler: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = self.start_span(operation, route, headers, params);
        let scope = SpanScope::new(span.clone());
        let cx = RequestContext {
            span: span.clone(),
            params: params.clone(),
        };

        let result = handler(cx).instrument(span).await;

        match &result {
            Ok(_) => scope.ok(),
            Err(e) => {
                log::error(
                    scope.span(),
                    "request failed",
                    e,
                    &[("operation", operation), ("route", route)],
                );
                scope.error(&e.to_string());
            }
        }
        result
    }
}

/// Guard owning a request span until its outcome is known.
///
/// Dropping the guard without calling [`SpanScope::ok`] or
/// [`SpanScope::error`] marks the span as aborted.
#[derive(Debug)]
pub struct SpanScope {
    span: Span,
    outcome_recorded: bool,
}

impl SpanScope {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            outcome_recorded: false,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn ok(mut self) {
        self.span.record("otel.status_code", "ok");
        self.outcome_recorded = true;
    }

    pub fn error(mut self, message: &str) {
        record_error(&self.span, message);
        self.outcome_recorded = true;
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        if !self.outcome_recorded {
            record_error(&self.span, ABORTED_MESSAGE);
        }
    }
}

fn record_error(span: &Span, message: &str) {
    // status_code must be set before the message is accepted
    span.record("otel.status_code", "error");
    span.record("otel.status_description", message);
}

/// Per-request view handed to handlers
#[derive(Debug, Clone)]
pub struct RequestContext {
    span: Span,
    params: PathParams,
}

impl RequestContext {
    /// Context not attached to any request span
    pub fn detached(params: PathParams) -> Self {
        Self {
            span: Span::none(),
            params,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Info line correlated with the request span
    pub fn info(&self, message: &str, attrs: &[(&str, &str)]) {
        log::info(&self.span, message, attrs);
    }

    /// Error line correlated with the request span
    pub fn error(&self, message: &str, err: &dyn fmt::Display, attrs: &[(&str, &str)]) {
        log::error(&self.span, message, err, attrs);
    }
}
