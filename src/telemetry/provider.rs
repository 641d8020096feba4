//! Tracer and logger provider lifecycle
//!
//! This module builds the OpenTelemetry tracer and logger providers, the
//! tracer derived from them and the propagator, and hands them out as a
//! single [`TelemetryState`]. It replaces the usual process-wide singletons:
//! the state is created once in `main`, shared via `Arc` and torn down once
//! by the shutdown coordinator.

use crate::config::{BatchConfig, TelemetryConfig};
use crate::telemetry::propagation::{self, Propagator};
use crate::telemetry::teardown::{self, ManagedProvider, ShutdownErrors};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::logs::{self as sdklogs, BatchLogProcessor, LogExporter, SdkLoggerProvider};
use opentelemetry_sdk::trace::{
    self as sdktrace, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider, SpanExporter,
};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semconv;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

/// Errors that can occur during telemetry initialization
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize span exporter: {0}")]
    SpanExporter(String),

    #[error("Failed to initialize log exporter: {0}")]
    LogExporter(String),

    #[error("Failed to flush telemetry: {0}")]
    Flush(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Source of the span and log exporters.
///
/// The sink is chosen at construction time: the binary uses
/// [`StdoutExporters`], tests plug in-memory exporters, and none of the call
/// sites change.
pub trait ExporterFactory {
    type Spans: SpanExporter + 'static;
    type Logs: LogExporter + 'static;

    fn span_exporter(&self) -> Result<Self::Spans, TelemetryError>;
    fn log_exporter(&self) -> Result<Self::Logs, TelemetryError>;
}

/// Human-readable span and log dumps on standard output
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutExporters;

impl ExporterFactory for StdoutExporters {
    type Spans = opentelemetry_stdout::SpanExporter;
    type Logs = opentelemetry_stdout::LogExporter;

    fn span_exporter(&self) -> Result<Self::Spans, TelemetryError> {
        Ok(opentelemetry_stdout::SpanExporter::default())
    }

    fn log_exporter(&self) -> Result<Self::Logs, TelemetryError> {
        Ok(opentelemetry_stdout::LogExporter::default())
    }
}

/// Process-wide telemetry handles.
///
/// Created exactly once by [`TelemetryState::init`], read-shared by every
/// request afterwards, and shut down exactly once by
/// [`crate::shutdown::ShutdownCoordinator`].
#[derive(Debug)]
pub struct TelemetryState {
    tracer_provider: SdkTracerProvider,
    logger_provider: SdkLoggerProvider,
    tracer: SdkTracer,
    propagator: Propagator,
}

impl TelemetryState {
    /// Build the tracer provider, logger provider, tracer and propagator.
    ///
    /// Both exporters are constructed before any provider exists, so a
    /// failing exporter leaves nothing half-initialized behind.
    ///
    /// # Errors
    ///
    /// * `TelemetryError::SpanExporter` / `TelemetryError::LogExporter` if
    ///   the factory cannot build an exporter. Callers must treat this as
    ///   fatal and not start serving.
    pub fn init<E: ExporterFactory>(
        exporters: &E,
        config: &TelemetryConfig,
    ) -> Result<Self, TelemetryError> {
        let span_exporter = exporters.span_exporter()?;
        let log_exporter = exporters.log_exporter()?;

        let resource = service_resource();

        let span_processor = BatchSpanProcessor::builder(span_exporter)
            .with_batch_config(span_batch_config(&config.batch))
            .build();
        let tracer_provider = SdkTracerProvider::builder()
            .with_span_processor(span_processor)
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone())
            .build();

        let log_processor = BatchLogProcessor::builder(log_exporter)
            .with_batch_config(log_batch_config(&config.batch))
            .build();
        let logger_provider = SdkLoggerProvider::builder()
            .with_log_processor(log_processor)
            .with_resource(resource)
            .build();

        let tracer = tracer_provider.tracer(crate::SERVICE_NAME);

        Ok(Self {
            tracer_provider,
            logger_provider,
            tracer,
            propagator: Propagator::new(),
        })
    }

    /// Install the tracer provider and a tracecontext + baggage propagator
    /// as the process-wide OpenTelemetry defaults.
    ///
    /// Only needed for third-party code that reads the globals; everything
    /// in this crate goes through the state itself.
    pub fn install_global(&self) {
        global::set_tracer_provider(self.tracer_provider.clone());
        global::set_text_map_propagator(propagation::composite_propagator());
        info!(
            service.name = crate::SERVICE_NAME,
            service.version = crate::SERVICE_VERSION,
            "OpenTelemetry initialized"
        );
    }

    /// Shared tracer; every request span is started on it
    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    pub fn logger_provider(&self) -> &SdkLoggerProvider {
        &self.logger_provider
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// `tracing` layer that turns spans into OpenTelemetry spans on
    /// [`TelemetryState::tracer`]
    pub fn tracing_layer<S>(&self) -> OpenTelemetryLayer<S, SdkTracer>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_opentelemetry::layer().with_tracer(self.tracer.clone())
    }

    /// Export everything queued in the batch processors right now
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.tracer_provider
            .force_flush()
            .map_err(|e| TelemetryError::Flush(format!("tracer provider: {}", e)))?;
        self.logger_provider
            .force_flush()
            .map_err(|e| TelemetryError::Flush(format!("logger provider: {}", e)))?;
        Ok(())
    }

    /// Shut down the tracer provider, then the logger provider.
    ///
    /// Failures do not short-circuit: each provider is attempted and every
    /// failure lands in the returned aggregate, tracer first. The whole call
    /// is bounded by `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownErrors {
        info!("Shutting down OpenTelemetry");

        let providers: Vec<Arc<dyn ManagedProvider>> = vec![
            Arc::new(self.tracer_provider.clone()),
            Arc::new(self.logger_provider.clone()),
        ];
        let errors = teardown::shutdown_providers(providers, deadline).await;

        if errors.is_empty() {
            info!("OpenTelemetry shutdown complete");
        }
        errors
    }
}

fn service_resource() -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(semconv::SERVICE_NAME, crate::SERVICE_NAME),
            KeyValue::new(semconv::SERVICE_VERSION, crate::SERVICE_VERSION),
        ])
        .build()
}

fn span_batch_config(batch: &BatchConfig) -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_scheduled_delay(batch.scheduled_delay())
        .with_max_export_batch_size(batch.max_export_batch_size)
        .build()
}

fn log_batch_config(batch: &BatchConfig) -> sdklogs::BatchConfig {
    sdklogs::BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_scheduled_delay(batch.scheduled_delay())
        .with_max_export_batch_size(batch.max_export_batch_size)
        .build()
}
