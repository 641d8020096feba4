//! W3C Trace Context and Baggage propagation
//!
//! Extracts trace context from incoming HTTP requests and injects it into
//! outgoing ones, following the
//! [W3C Trace Context](https://www.w3.org/TR/trace-context/) and
//! [W3C Baggage](https://www.w3.org/TR/baggage/) specifications.
//!
//! ## Headers
//!
//! - **traceparent**: `00-{trace-id}-{span-id}-{trace-flags}`
//!   - Example: `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
//! - **tracestate**: vendor-specific data, `vendor1=value1,vendor2=value2`
//! - **baggage**: application key/values, `tenant=acme,region=eu`
//!
//! Propagation is best-effort: missing or malformed headers yield a context
//! without a remote parent, never an error.
//!
//! ## Usage
//!
//! ```
//! use hyper::header::HeaderMap;
//! use opentelemetry::trace::TraceContextExt;
//! use otel_greeter::telemetry::Propagator;
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(
//!     "traceparent",
//!     "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".parse().unwrap(),
//! );
//!
//! let propagator = Propagator::new();
//! let cx = propagator.extract(&headers);
//! let remote = cx.span().span_context().clone();
//! assert!(remote.is_remote());
//! assert_eq!(remote.span_id().to_string(), "b7ad6b7169203331");
//!
//! let mut outgoing = HeaderMap::new();
//! propagator.inject(&cx, &mut outgoing);
//! assert!(outgoing.contains_key("traceparent"));
//! ```

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use std::fmt;

/// Composite tracecontext + baggage propagator
pub fn composite_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

/// Extracts and injects trace context on HTTP header maps
pub struct Propagator {
    inner: TextMapCompositePropagator,
}

impl Propagator {
    pub fn new() -> Self {
        Self {
            inner: composite_propagator(),
        }
    }

    /// Parse `traceparent`, `tracestate` and `baggage` into a context.
    ///
    /// When the headers are absent or malformed the returned context carries
    /// no valid span, so spans started from it become roots.
    pub fn extract(&self, headers: &HeaderMap) -> Context {
        self.inner.extract(&HeaderExtractor(headers))
    }

    /// Serialize the span and baggage of `cx` into `headers`
    pub fn inject(&self, cx: &Context, headers: &mut HeaderMap) {
        self.inner.inject_context(cx, &mut HeaderInjector(headers));
    }

    /// Header names this propagator reads and writes
    pub fn fields(&self) -> Vec<String> {
        self.inner.fields().map(str::to_string).collect()
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Propagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagator")
            .field("fields", &self.fields())
            .finish()
    }
}

/// Read-only view of a [`HeaderMap`] as a propagation carrier
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        // HeaderMap lookups are case-insensitive; non-ASCII values are skipped
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Mutable view of a [`HeaderMap`] as a propagation carrier
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.0.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::baggage::BaggageExt;
    use opentelemetry::trace::TraceContextExt;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extract_valid_traceparent() {
        let cx = Propagator::new().extract(&headers(&[("traceparent", TRACEPARENT)]));
        let span_context = cx.span().span_context().clone();

        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert!(span_context.is_sampled());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(span_context.span_id().to_string(), "b7ad6b7169203331");
    }

    #[test]
    fn test_extract_uppercase_header_name() {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_static("traceparent"),
            HeaderValue::from_static(TRACEPARENT),
        );
        let extractor = HeaderExtractor(&map);
        assert_eq!(extractor.get("TraceParent"), Some(TRACEPARENT));
    }

    #[test]
    fn test_extract_missing_headers() {
        let cx = Propagator::new().extract(&HeaderMap::new());
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_extract_malformed_traceparent() {
        for bad in [
            "invalid",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "00-zzf7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            let cx = Propagator::new().extract(&headers(&[("traceparent", bad)]));
            assert!(
                !cx.span().span_context().is_valid(),
                "malformed traceparent accepted: {bad}"
            );
        }
    }

    #[test]
    fn test_extract_baggage() {
        let cx = Propagator::new().extract(&headers(&[
            ("traceparent", TRACEPARENT),
            ("baggage", "tenant=acme,region=eu"),
        ]));
        let baggage = cx.baggage();
        assert_eq!(baggage.get("tenant").map(|v| v.to_string()), Some("acme".into()));
        assert_eq!(baggage.get("region").map(|v| v.to_string()), Some("eu".into()));
    }

    #[test]
    fn test_inject_carries_tracestate() {
        let propagator = Propagator::new();
        let cx = propagator.extract(&headers(&[
            ("traceparent", TRACEPARENT),
            ("tracestate", "congo=t61rcWkgMzE"),
        ]));

        let mut outgoing = HeaderMap::new();
        propagator.inject(&cx, &mut outgoing);

        assert_eq!(outgoing.get("traceparent").unwrap(), TRACEPARENT);
        assert_eq!(outgoing.get("tracestate").unwrap(), "congo=t61rcWkgMzE");
    }

    #[test]
    fn test_inject_without_span_writes_no_traceparent() {
        let mut outgoing = HeaderMap::new();
        Propagator::new().inject(&Context::new(), &mut outgoing);
        assert!(!outgoing.contains_key("traceparent"));
    }

    #[test]
    fn test_fields_cover_both_propagators() {
        let fields = Propagator::new().fields();
        assert!(fields.iter().any(|f| f == "traceparent"));
        assert!(fields.iter().any(|f| f == "baggage"));
    }
}
