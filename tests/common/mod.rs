//! Shared test infrastructure
//!
//! - In-memory and failing exporter factories
//! - A scoped subscriber wired exactly like the binary's
//! - A layer recording the shutdown phase at span close
//! - A running server with an HTTP client

#![allow(dead_code)]

use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLogRecord};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use otel_greeter::config::TelemetryConfig;
use otel_greeter::router::Router;
use otel_greeter::server::{HttpServer, ServerHandle};
use otel_greeter::shutdown::ShutdownPhase;
use otel_greeter::telemetry::{build_subscriber, ExporterFactory, TelemetryError, TelemetryState};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::subscriber::DefaultGuard;
use tracing::{span, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
pub const REMOTE_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
pub const REMOTE_SPAN_ID: &str = "b7ad6b7169203331";

/// Exporters capturing everything in memory
#[derive(Clone, Default)]
pub struct InMemoryExporters {
    pub spans: InMemorySpanExporter,
    pub logs: InMemoryLogExporter,
}

impl ExporterFactory for InMemoryExporters {
    type Spans = InMemorySpanExporter;
    type Logs = InMemoryLogExporter;

    fn span_exporter(&self) -> Result<Self::Spans, TelemetryError> {
        Ok(self.spans.clone())
    }

    fn log_exporter(&self) -> Result<Self::Logs, TelemetryError> {
        Ok(self.logs.clone())
    }
}

/// Factory whose exporter construction fails
#[derive(Clone, Copy)]
pub enum FailingExporters {
    SpanSink,
    LogSink,
}

impl ExporterFactory for FailingExporters {
    type Spans = InMemorySpanExporter;
    type Logs = InMemoryLogExporter;

    fn span_exporter(&self) -> Result<InMemorySpanExporter, TelemetryError> {
        match self {
            FailingExporters::SpanSink => Err(TelemetryError::SpanExporter(
                "collector unreachable".to_string(),
            )),
            FailingExporters::LogSink => Ok(InMemorySpanExporter::default()),
        }
    }

    fn log_exporter(&self) -> Result<InMemoryLogExporter, TelemetryError> {
        match self {
            FailingExporters::SpanSink => Ok(InMemoryLogExporter::default()),
            FailingExporters::LogSink => Err(TelemetryError::LogExporter(
                "collector unreachable".to_string(),
            )),
        }
    }
}

/// Working span sink, failing log sink
#[derive(Clone, Default)]
pub struct BrokenLogExporters {
    pub spans: InMemorySpanExporter,
}

impl ExporterFactory for BrokenLogExporters {
    type Spans = InMemorySpanExporter;
    type Logs = InMemoryLogExporter;

    fn span_exporter(&self) -> Result<InMemorySpanExporter, TelemetryError> {
        Ok(self.spans.clone())
    }

    fn log_exporter(&self) -> Result<InMemoryLogExporter, TelemetryError> {
        Err(TelemetryError::LogExporter("collector unreachable".to_string()))
    }
}

/// Records the shutdown phase each time a span closes
#[derive(Clone, Default)]
pub struct PhaseRecorder {
    phase: Arc<Mutex<Option<watch::Receiver<ShutdownPhase>>>>,
    closed: Arc<Mutex<Vec<ShutdownPhase>>>,
}

impl PhaseRecorder {
    pub fn attach(&self, phase: watch::Receiver<ShutdownPhase>) {
        *self.phase.lock().unwrap() = Some(phase);
    }

    /// Phase observed at each span close, in close order
    pub fn closed_during(&self) -> Vec<ShutdownPhase> {
        self.closed.lock().unwrap().clone()
    }
}

impl<S> Layer<S> for PhaseRecorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_close(&self, _id: span::Id, _ctx: Context<'_, S>) {
        if let Some(phase) = self.phase.lock().unwrap().as_ref() {
            self.closed.lock().unwrap().push(*phase.borrow());
        }
    }
}

/// Telemetry state with in-memory sinks and a thread-scoped subscriber
pub struct Harness {
    pub telemetry: Arc<TelemetryState>,
    pub exporters: InMemoryExporters,
    _guard: DefaultGuard,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(TelemetryConfig::default(), None)
    }

    pub fn with_recorder(recorder: PhaseRecorder) -> Self {
        Self::build(TelemetryConfig::default(), Some(recorder))
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: TelemetryConfig, recorder: Option<PhaseRecorder>) -> Self {
        let exporters = InMemoryExporters::default();
        let telemetry = Arc::new(TelemetryState::init(&exporters, &config).unwrap());

        let subscriber = build_subscriber(&telemetry, &config).unwrap().with(recorder);
        let guard = tracing::subscriber::set_default(subscriber);

        Self {
            telemetry,
            exporters,
            _guard: guard,
        }
    }

    /// Flush and return every finished span.
    ///
    /// Must be called before the telemetry state is shut down.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.telemetry.force_flush().unwrap();
        self.exporters.spans.get_finished_spans().unwrap()
    }

    pub fn span_named(&self, name: &str) -> SpanData {
        let spans = self.finished_spans();
        let mut matching: Vec<_> = spans.into_iter().filter(|s| s.name == name).collect();
        assert_eq!(matching.len(), 1, "expected exactly one {name} span");
        matching.remove(0)
    }

    /// Flush and return every emitted log record
    pub fn log_records(&self) -> Vec<SdkLogRecord> {
        self.telemetry.force_flush().unwrap();
        self.exporters
            .logs
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .map(|log| log.record)
            .collect()
    }

    /// Bind a server on an ephemeral port and start it
    pub async fn start_server(&self, router: Router) -> ServerHandle {
        HttpServer::bind("127.0.0.1:0", router, self.telemetry.clone())
            .await
            .unwrap()
            .start()
    }
}

pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap()
}
