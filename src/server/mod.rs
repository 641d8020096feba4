//! HTTP server
//!
//! Accepts connections on a tokio listener and serves each one with hyper's
//! HTTP/1 connection builder. Every request is resolved against the
//! [`Router`] and run through the [`RequestInstrumentor`], so the request
//! span is closed before the response is handed back to hyper.
//!
//! The server is started in the background and controlled through a
//! [`ServerHandle`]: `drain` stops accepting, lets in-flight connections
//! finish and waits for the serve loop to exit.
//!
//! [`prepare`] is the startup sequence shared by the binary and the tests:
//! telemetry first, then the listener.

use crate::config::Config;
use crate::router::Router;
use crate::telemetry::{ExporterFactory, RequestInstrumentor, TelemetryError, TelemetryState};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already stopped")]
    AlreadyStopped,

    #[error("Server did not drain within {0:?}")]
    DrainTimeout(Duration),

    #[error("Server task failed: {0}")]
    Task(String),
}

/// Failures that stop the process before it serves anything
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Telemetry initialized and listener bound, not serving yet
pub struct Startup {
    pub telemetry: Arc<TelemetryState>,
    pub server: HttpServer,
}

/// Initialize telemetry from `exporters`, then bind the greeter routes.
///
/// Nothing is bound when an exporter cannot be built.
pub async fn prepare<E: ExporterFactory>(
    exporters: &E,
    config: &Config,
) -> Result<Startup, StartupError> {
    let telemetry = Arc::new(TelemetryState::init(exporters, &config.telemetry)?);
    let server = HttpServer::bind(&config.server.address, Router::greeter(), telemetry.clone()).await?;
    Ok(Startup { telemetry, server })
}

/// Contract between the shutdown coordinator and a running server
#[async_trait]
pub trait ServerAdapter: Send {
    /// Stop accepting connections and wait up to `timeout` for in-flight
    /// requests to finish.
    async fn drain(&mut self, timeout: Duration) -> Result<(), ServerError>;
}

/// A bound, not yet serving, HTTP server
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<GreeterService>,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// Binding happens before serving so a port conflict surfaces as
    /// `ServerError::Bind` at startup. Use port 0 to get an ephemeral port.
    pub async fn bind(
        address: &str,
        router: Router,
        telemetry: Arc<TelemetryState>,
    ) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            service: Arc::new(GreeterService {
                router,
                instrumentor: RequestInstrumentor::new(telemetry),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the serve loop
    pub fn start(self) -> ServerHandle {
        info!("Listening on http://{}", self.local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(self.listener, self.service, shutdown_rx));

        ServerHandle {
            local_addr: self.local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

#[async_trait]
impl ServerAdapter for ServerHandle {
    /// Drain the server.
    ///
    /// When `timeout` elapses the serve loop is aborted and connections
    /// still in flight are abandoned.
    async fn drain(&mut self, timeout: Duration) -> Result<(), ServerError> {
        let (Some(shutdown_tx), Some(mut task)) = (self.shutdown_tx.take(), self.task.take())
        else {
            return Err(ServerError::AlreadyStopped);
        };

        info!("Draining HTTP server");
        // The serve loop also stops if the receiver is gone
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {
                info!("HTTP server drained");
                Ok(())
            }
            Ok(Err(e)) => Err(ServerError::Task(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ServerError::DrainTimeout(timeout))
            }
        }
    }
}

struct GreeterService {
    router: Router,
    instrumentor: RequestInstrumentor,
}

impl GreeterService {
    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let route = self.router.resolve(req.method(), req.uri().path());
        debug!(
            method = %req.method(),
            path = req.uri().path(),
            operation = route.operation,
            "Request"
        );

        let handler = route.handler;
        let result = self
            .instrumentor
            .run(
                route.operation,
                route.template,
                req.headers(),
                &route.params,
                |cx| handler.call(cx),
            )
            .await;

        Ok(match result {
            Ok(reply) => reply.into_response(),
            Err(e) => e.into_response(),
        })
    }
}

async fn serve(
    listener: TcpListener,
    service: Arc<GreeterService>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Stopped accepting connections");
                break;
            }
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let service = service.clone();
                let conn = http1::Builder::new().serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |req| {
                        let service = service.clone();
                        async move { service.handle(req).await }
                    }),
                );
                let conn = graceful.watch(conn);

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(%peer_addr, "Connection error: {}", e);
                    }
                });
            }
        }
    }

    drop(listener);
    graceful.shutdown().await;
}
