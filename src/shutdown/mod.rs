//! Graceful shutdown coordination
//!
//! The coordinator walks a fixed sequence once a termination signal
//! arrives:
//!
//! ```text
//! Running -> Draining -> TelemetryStopping -> Stopped
//! ```
//!
//! The HTTP server is fully drained before the telemetry providers are shut
//! down, so spans of requests that completed during the drain are still
//! exported. Every step is attempted even if an earlier one failed; the
//! outcome of each is collected in a [`ShutdownReport`].

use crate::config::Config;
use crate::server::{ServerAdapter, ServerError};
use crate::telemetry::{ShutdownErrors, TelemetryState};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving; waiting for a termination signal
    Running,
    /// Server stops accepting and finishes in-flight requests
    Draining,
    /// Tracer then logger provider are flushed and shut down
    TelemetryStopping,
    Stopped,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::Running => "running",
            ShutdownPhase::Draining => "draining",
            ShutdownPhase::TelemetryStopping => "telemetry_stopping",
            ShutdownPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed shutdown sequence
#[derive(Debug)]
pub struct ShutdownReport {
    /// Phases traversed, in order
    pub phases: Vec<ShutdownPhase>,
    pub drain: Result<(), ServerError>,
    pub telemetry: ShutdownErrors,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.drain.is_ok() && self.telemetry.is_empty()
    }

    /// Process exit status: 0 when every step succeeded, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

/// Drives the shutdown sequence
pub struct ShutdownCoordinator {
    telemetry: Arc<TelemetryState>,
    drain_timeout: Duration,
    telemetry_timeout: Duration,
    phase_tx: watch::Sender<ShutdownPhase>,
    phases: Vec<ShutdownPhase>,
}

impl ShutdownCoordinator {
    pub fn new(telemetry: Arc<TelemetryState>, config: &Config) -> Self {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            telemetry,
            drain_timeout: config.server.drain_timeout(),
            telemetry_timeout: config.telemetry.shutdown_timeout(),
            phase_tx,
            phases: vec![ShutdownPhase::Running],
        }
    }

    /// Watch the current phase
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Wait for `signal`, then drain `server` and shut telemetry down.
    ///
    /// Consumes the coordinator: the sequence runs at most once.
    pub async fn run<S, F>(mut self, server: &mut S, signal: F) -> ShutdownReport
    where
        S: ServerAdapter + ?Sized,
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Shutdown signal received");

        self.enter(ShutdownPhase::Draining);
        let drain = server.drain(self.drain_timeout).await;
        if let Err(e) = &drain {
            warn!("HTTP server drain failed: {}", e);
        }

        // Deadline starts when this phase is entered
        self.enter(ShutdownPhase::TelemetryStopping);
        let telemetry = self.telemetry.shutdown(self.telemetry_timeout).await;
        if !telemetry.is_empty() {
            warn!("{}", telemetry);
        }

        self.enter(ShutdownPhase::Stopped);
        let report = ShutdownReport {
            phases: self.phases,
            drain,
            telemetry,
        };
        info!(clean = report.is_clean(), "Shutdown complete");
        report
    }

    fn enter(&mut self, phase: ShutdownPhase) {
        info!(%phase, "Shutdown phase");
        self.phases.push(phase);
        self.phase_tx.send_replace(phase);
    }
}

/// Termination signals, registered up front.
///
/// Registering at startup turns a failure to install the handlers into a
/// startup error instead of a shutdown that can never be triggered.
pub struct Signals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl Signals {
    /// Register SIGINT and SIGTERM handlers (Ctrl-C elsewhere)
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the first termination signal
    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.sigint.recv() => info!(signal = "SIGINT", "Received termination signal"),
            _ = self.sigterm.recv() => info!(signal = "SIGTERM", "Received termination signal"),
        }
    }

    /// Wait for the first termination signal
    #[cfg(not(unix))]
    pub async fn recv(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(signal = "ctrl-c", "Received termination signal"),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::StdoutExporters;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Server {}

        #[async_trait]
        impl ServerAdapter for Server {
            async fn drain(&mut self, timeout: Duration) -> Result<(), ServerError>;
        }
    }

    fn coordinator() -> ShutdownCoordinator {
        let config = Config::default();
        let telemetry = TelemetryState::init(&StdoutExporters, &config.telemetry).unwrap();
        ShutdownCoordinator::new(Arc::new(telemetry), &config)
    }

    #[tokio::test]
    async fn test_clean_shutdown() {
        let coordinator = coordinator();
        let phase = coordinator.subscribe();
        let mut server = MockServer::new();
        server
            .expect_drain()
            .withf(|timeout| *timeout == Duration::from_secs(10))
            .times(1)
            .returning(|_| Ok(()));

        let report = coordinator.run(&mut server, std::future::ready(())).await;

        assert!(report.is_clean());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            report.phases,
            vec![
                ShutdownPhase::Running,
                ShutdownPhase::Draining,
                ShutdownPhase::TelemetryStopping,
                ShutdownPhase::Stopped,
            ]
        );
        assert_eq!(*phase.borrow(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn test_drain_runs_before_telemetry_shutdown() {
        let coordinator = coordinator();
        let phase = coordinator.subscribe();
        let mut server = MockServer::new();
        server.expect_drain().times(1).returning(move |_| {
            assert_eq!(*phase.borrow(), ShutdownPhase::Draining);
            Ok(())
        });

        let report = coordinator.run(&mut server, std::future::ready(())).await;
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_drain_failure_still_stops_telemetry() {
        let coordinator = coordinator();
        let mut server = MockServer::new();
        server
            .expect_drain()
            .times(1)
            .returning(|timeout| Err(ServerError::DrainTimeout(timeout)));

        let report = coordinator.run(&mut server, std::future::ready(())).await;

        assert!(matches!(report.drain, Err(ServerError::DrainTimeout(_))));
        assert!(report.phases.contains(&ShutdownPhase::TelemetryStopping));
        assert!(report.telemetry.is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_signal() {
        let coordinator = coordinator();
        let mut phase = coordinator.subscribe();
        let mut server = MockServer::new();
        server.expect_drain().returning(|_| Ok(()));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            coordinator
                .run(&mut server, async {
                    let _ = rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*phase.borrow_and_update(), ShutdownPhase::Running);

        tx.send(()).unwrap();
        let report = run.await.unwrap();
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ShutdownPhase::TelemetryStopping.to_string(), "telemetry_stopping");
    }
}
