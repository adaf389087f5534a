//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: request id → access log → chaos → upstream
//! - Accept connections and serve HTTP/1.1 and HTTP/2 on them
//! - Drain on shutdown: stop accepting, let in-flight requests finish,
//!   abort whatever is left once the grace period expires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::any, Router};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful},
    service::TowerToHyperService,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::chaos::ChaosEngine;
use crate::config::ProxyConfig;
use crate::http::forward::{proxy_handler, ForwardError, UpstreamForwarder};
use crate::http::middleware::{access_log, chaos_middleware};
use crate::net::{self, ConnectionSet, ListenerError};

/// Errors that stop a server instance.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Upstream(#[from] ForwardError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),

    #[error("server stopped unexpectedly")]
    Stopped,
}

/// One server instance bound to one configuration snapshot.
pub struct ChaosServer {
    router: Router,
    bind_address: String,
    grace: Duration,
}

impl ChaosServer {
    /// Create a new server for `config`, injecting faults with `engine`.
    pub fn new(config: &ProxyConfig, engine: Arc<ChaosEngine>) -> Result<Self, ServerError> {
        let forwarder = UpstreamForwarder::new(&config.upstream)?;

        Ok(Self {
            router: build_router(forwarder, engine),
            bind_address: config.listener.bind_address.clone(),
            grace: config.timeouts.shutdown_grace(),
        })
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        Ok(net::bind(&self.bind_address).await?)
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let graceful = graceful::GracefulShutdown::new();
        let mut connections = ConnectionSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.router.clone(),
                            graceful.watcher(),
                        ));
                        tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection accepted");
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = connections.reap(), if !connections.is_empty() => {}
                _ = shutdown.recv() => break,
            }
        }

        // Stop accepting before draining.
        drop(listener);
        tracing::info!(
            address = %addr,
            in_flight = connections.len(),
            grace_secs = self.grace.as_secs_f64(),
            "Shutting down server, draining connections"
        );

        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!(address = %addr, "Server stopped gracefully");
            }
            _ = tokio::time::sleep(self.grace) => {
                tracing::warn!(
                    address = %addr,
                    remaining = connections.len(),
                    "Drain timed out, closing remaining connections"
                );
            }
        }
        connections.close_all().await;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(forwarder: UpstreamForwarder, engine: Arc<ChaosEngine>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(forwarder)
        .layer(middleware::from_fn_with_state(engine, chaos_middleware))
        .layer(middleware::from_fn(access_log))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    watcher: graceful::Watcher,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));

    if let Err(e) = watcher.watch(connection).await {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection closed with error");
    }
}
