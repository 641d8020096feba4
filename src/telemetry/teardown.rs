//! Ordered, deadline-bounded provider shutdown
//!
//! Providers are shut down one after another on a dedicated worker thread,
//! in the order given, each with whatever is left of a single deadline. The
//! caller awaits the results against the same deadline, so an exporter that
//! hangs while flushing can delay shutdown by at most that deadline. Every
//! provider is attempted even when an earlier one failed or overran.

use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A telemetry provider that can be shut down once
pub trait ManagedProvider: Send + Sync {
    /// Short name used in error reports ("tracer", "logger")
    fn name(&self) -> &'static str;

    /// Flush pending data and release the exporter within `timeout`
    fn shutdown(&self, timeout: Duration) -> OTelSdkResult;
}

impl ManagedProvider for SdkTracerProvider {
    fn name(&self) -> &'static str {
        "tracer"
    }

    fn shutdown(&self, timeout: Duration) -> OTelSdkResult {
        self.shutdown_with_timeout(timeout)
    }
}

impl ManagedProvider for SdkLoggerProvider {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn shutdown(&self, timeout: Duration) -> OTelSdkResult {
        self.shutdown_with_timeout(timeout)
    }
}

/// One failure encountered while tearing down a provider
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("{provider} provider shutdown error: {source}")]
    Provider {
        provider: &'static str,
        #[source]
        source: OTelSdkError,
    },

    #[error("{provider} provider shutdown did not complete within {deadline:?}")]
    Timeout {
        provider: &'static str,
        deadline: Duration,
    },

    #[error("{provider} provider shutdown aborted: worker exited early")]
    Aborted { provider: &'static str },

    #[error("Failed to start shutdown worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl ShutdownError {
    /// Whether this failure is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShutdownError::Timeout { .. })
    }

    /// Provider the failure belongs to, if any
    pub fn provider(&self) -> Option<&'static str> {
        match self {
            ShutdownError::Provider { provider, .. }
            | ShutdownError::Timeout { provider, .. }
            | ShutdownError::Aborted { provider } => Some(provider),
            ShutdownError::Worker(_) => None,
        }
    }
}

/// Ordered collection of provider shutdown failures.
///
/// Empty means every provider shut down cleanly.
#[derive(Debug, Default)]
pub struct ShutdownErrors(Vec<ShutdownError>);

impl ShutdownErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShutdownError> {
        self.0.iter()
    }

    pub fn has_timeout(&self) -> bool {
        self.0.iter().any(ShutdownError::is_timeout)
    }

    pub fn into_inner(self) -> Vec<ShutdownError> {
        self.0
    }

    fn push(&mut self, error: ShutdownError) {
        warn!("{}", error);
        self.0.push(error);
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown completed with {} error(s)", self.0.len())
    }
}

impl<'a> IntoIterator for &'a ShutdownErrors {
    type Item = &'a ShutdownError;
    type IntoIter = std::slice::Iter<'a, ShutdownError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Shut down `providers` in order, giving up once `deadline` has elapsed.
///
/// A failing provider does not stop the next one from being attempted. When
/// the deadline expires, the provider in flight and every provider after it
/// are reported as [`ShutdownError::Timeout`]. The worker thread keeps going
/// and still attempts the remaining providers, with no time left on their
/// budget.
pub async fn shutdown_providers(
    providers: Vec<Arc<dyn ManagedProvider>>,
    deadline: Duration,
) -> ShutdownErrors {
    let expires_at = Instant::now() + deadline;
    let names: Vec<&'static str> = providers.iter().map(|p| p.name()).collect();
    let mut errors = ShutdownErrors::default();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker_expires_at = expires_at.into_std();
    let worker = std::thread::Builder::new()
        .name("telemetry-shutdown".into())
        .spawn(move || {
            for provider in providers {
                let remaining =
                    worker_expires_at.saturating_duration_since(std::time::Instant::now());
                let result = provider.shutdown(remaining);
                // The caller may have stopped waiting; keep going regardless
                let _ = tx.send(result);
            }
        });
    if let Err(e) = worker {
        errors.push(ShutdownError::Worker(e));
        return errors;
    }

    let mut pending = names.into_iter();
    while let Some(provider) = pending.next() {
        match tokio::time::timeout_at(expires_at, rx.recv()).await {
            Ok(Some(Ok(()))) => debug!(provider, "Provider shut down"),
            Ok(Some(Err(source))) => errors.push(ShutdownError::Provider { provider, source }),
            Ok(None) => {
                errors.push(ShutdownError::Aborted { provider });
                for provider in pending.by_ref() {
                    errors.push(ShutdownError::Aborted { provider });
                }
            }
            Err(_) => {
                errors.push(ShutdownError::Timeout { provider, deadline });
                for provider in pending.by_ref() {
                    errors.push(ShutdownError::Timeout { provider, deadline });
                }
            }
        }
    }

    errors
}
