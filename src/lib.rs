//! otel-greeter library
//!
//! A tiny greeting HTTP service whose interesting part is the telemetry
//! lifecycle: OpenTelemetry provider setup, per-request span
//! instrumentation with correlated logs, and an ordered, deadline-bounded
//! shutdown sequence.
//!
//! # Features
//!
//! - **Explicit telemetry state**: providers live in a [`TelemetryState`]
//!   shared through an `Arc`, no hidden singletons
//! - **W3C propagation**: `traceparent`, `tracestate` and `baggage` headers
//! - **Span-scoped handlers**: every request gets exactly one span, closed
//!   on every exit path
//! - **Graceful shutdown**: drain HTTP first, then flush traces, then logs
//!
//! # Example
//!
//! ```no_run
//! use otel_greeter::config::Config;
//! use otel_greeter::server::{self, Startup};
//! use otel_greeter::shutdown::{ShutdownCoordinator, Signals};
//! use otel_greeter::telemetry::{init_subscriber, StdoutExporters};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let Startup { telemetry, server } = server::prepare(&StdoutExporters, &config).await?;
//!     init_subscriber(&telemetry, &config.telemetry)?;
//!
//!     let signals = Signals::install()?;
//!     let mut handle = server.start();
//!
//!     let report = ShutdownCoordinator::new(telemetry, &config)
//!         .run(&mut handle, signals.recv())
//!         .await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod config;
pub mod greeting;
pub mod router;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use server::HttpServer;
pub use shutdown::ShutdownCoordinator;
pub use telemetry::TelemetryState;

/// Service name reported in the telemetry resource
pub const SERVICE_NAME: &str = "otel-greeter";

/// Service version reported in the telemetry resource
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
