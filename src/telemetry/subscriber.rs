//! Tracing subscriber setup with layered architecture
//!
//! ```text
//! Registry
//!   ├── Fmt Layer (stderr, text or JSON)      [EnvFilter]
//!   ├── OpenTelemetry Layer (spans -> tracer)  [internal crates excluded]
//!   └── Log Bridge (events -> logger provider) [EnvFilter, internal crates excluded]
//! ```
//!
//! The `EnvFilter` (`RUST_LOG`, else `telemetry.log_filter`) is a per-layer
//! filter on the log outputs only. Request spans reach the tracer provider
//! whatever the log level is.
//!
//! Spans and events produced by the exporters themselves, or by the HTTP
//! stack underneath them, never reach the OpenTelemetry layers; otherwise
//! every export would produce new records to export.

use crate::config::{LogFormat, TelemetryConfig};
use crate::telemetry::{TelemetryError, TelemetryState};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use tracing::Subscriber;
use tracing_subscriber::filter::{filter_fn, FilterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// Target prefixes kept away from the OpenTelemetry layers
const OTEL_EXCLUDED_TARGETS: &[&str] = &["opentelemetry", "hyper", "h2"];

/// Build the subscriber without installing it.
///
/// Tests install the result with `tracing::subscriber::set_default`, possibly
/// with extra layers on top; the binary goes through [`init_subscriber`].
pub fn build_subscriber(
    state: &TelemetryState,
    config: &TelemetryConfig,
) -> Result<
    impl Subscriber + for<'span> LookupSpan<'span> + Send + Sync + 'static,
    TelemetryError,
> {
    let (text_layer, json_layer) = match config.log_format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            ),
        ),
    };

    let fmt_layer = Layer::and_then(text_layer, json_layer)
        .with_filter(log_filter(config)?);

    let tracing_layer = state
        .tracing_layer()
        .with_filter(filter_fn(|metadata| !is_internal(metadata.target())));

    let log_bridge = OpenTelemetryTracingBridge::new(state.logger_provider()).with_filter(
        log_filter(config)?.and(filter_fn(|metadata| !is_internal(metadata.target()))),
    );

    Ok(tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_layer)
        .with(log_bridge))
}

/// `RUST_LOG` if set, else the configured filter.
///
/// Built once per layer since `EnvFilter` is not `Clone`.
fn log_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| {
            TelemetryError::Subscriber(format!(
                "invalid log filter {:?}: {}",
                config.log_filter, e
            ))
        })
}

/// Build the subscriber and install it as the global default.
///
/// # Errors
///
/// `TelemetryError::Subscriber` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_subscriber(
    state: &TelemetryState,
    config: &TelemetryConfig,
) -> Result<(), TelemetryError> {
    let subscriber = build_subscriber(state, config)?;
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        TelemetryError::Subscriber(format!(
            "Failed to set global subscriber (may already be initialized): {}",
            e
        ))
    })
}

fn is_internal(target: &str) -> bool {
    OTEL_EXCLUDED_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('_') || rest.starts_with("::"))
    })
}
