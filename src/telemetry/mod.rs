//! OpenTelemetry integration
//!
//! Owns the telemetry pipeline of the service: tracer and logger providers,
//! W3C trace-context propagation, span-scoped request instrumentation with
//! correlated logs, and the ordered provider teardown.
//!
//! # Layout
//!
//! ```text
//! TelemetryState (Arc, shared)
//!   ├── SdkTracerProvider ── batch ── span exporter (stdout)
//!   ├── SdkLoggerProvider ── batch ── log exporter  (stdout)
//!   ├── SdkTracer ─────────────────── tracing-opentelemetry layer
//!   └── Propagator (tracecontext + baggage)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use otel_greeter::config::TelemetryConfig;
//! use otel_greeter::telemetry::{StdoutExporters, TelemetryState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TelemetryConfig::default();
//! let telemetry = TelemetryState::init(&StdoutExporters, &config)?;
//!
//! // ... serve requests ...
//!
//! let errors = telemetry.shutdown(config.shutdown_timeout()).await;
//! assert!(errors.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod instrumentation;
pub mod log;
pub mod propagation;
pub mod provider;
pub mod subscriber;
pub mod teardown;

pub use instrumentation::{RequestContext, RequestInstrumentor, SpanScope};
pub use propagation::Propagator;
pub use provider::{ExporterFactory, StdoutExporters, TelemetryError, TelemetryState};
pub use subscriber::{build_subscriber, init_subscriber};
pub use teardown::{ManagedProvider, ShutdownError, ShutdownErrors};
