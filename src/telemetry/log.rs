//! Trace-correlated log lines
//!
//! Log events carry the trace and span ids of the span they are emitted in,
//! so console lines and exported log records can be joined to their trace.
//! When the span has no valid OpenTelemetry context (no layer installed,
//! span disabled) the event degrades to attributes only.

use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use std::fmt;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Key/value attributes rendered as `key=value` pairs
#[derive(Debug, Clone, Copy)]
pub struct Attributes<'a>(pub &'a [(&'a str, &'a str)]);

impl fmt::Display for Attributes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Trace and span ids of `span`, if it carries a valid span context
pub fn span_ids(span: &Span) -> Option<(TraceId, SpanId)> {
    let cx = span.context();
    let otel_span = cx.span();
    let span_context = otel_span.span_context();
    if span_context.is_valid() {
        Some((span_context.trace_id(), span_context.span_id()))
    } else {
        None
    }
}

/// Emit an info line correlated with `span`
pub fn info(span: &Span, message: &str, attrs: &[(&str, &str)]) {
    let attributes = Attributes(attrs);
    match span_ids(span) {
        Some((trace_id, span_id)) => {
            tracing::info!(parent: span, %trace_id, %span_id, %attributes, "{}", message)
        }
        None => tracing::info!(parent: span, %attributes, "{}", message),
    }
}

/// Emit an error line correlated with `span`
pub fn error(span: &Span, message: &str, err: &dyn fmt::Display, attrs: &[(&str, &str)]) {
    let attributes = Attributes(attrs);
    match span_ids(span) {
        Some((trace_id, span_id)) => tracing::error!(
            parent: span,
            %trace_id,
            %span_id,
            error = %err,
            %attributes,
            "{}",
            message
        ),
        None => tracing::error!(parent: span, error = %err, %attributes, "{}", message),
    }
}
