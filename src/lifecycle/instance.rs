//! A running server instance and its drain.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chaos::ChaosEngine;
use crate::config::{ChaosSettings, ProxyConfig};
use crate::http::{ChaosServer, ServerError};

/// Server task bound to one configuration snapshot.
pub struct ServerInstance {
    generation: u64,
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerInstance {
    /// Build the engine and server for `config`, bind, and start serving.
    pub async fn start(config: &ProxyConfig, generation: u64) -> Result<Self, ServerError> {
        let engine = Arc::new(engine_for(&config.chaos));
        let server = ChaosServer::new(config, engine)?;
        let listener = server.bind().await?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run(listener, shutdown_rx));

        let chaos = &config.chaos;
        tracing::info!(
            generation,
            listen = %local_addr,
            upstream = %config.upstream.url,
            drop_rate = chaos.drop_rate,
            error_rate = chaos.error_rate,
            error_code = chaos.error_code,
            corrupt_rate = chaos.corrupt_rate,
            latency_ms = chaos.latency_ms,
            latency_min_ms = chaos.latency_min_ms,
            latency_max_ms = chaos.latency_max_ms,
            "Starting server"
        );

        Ok(Self {
            generation,
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drain, and wait until the listener is released.
    pub async fn drain(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(());
        join(self.task).await
    }

    /// Resolves only if the server task ends without being drained.
    pub async fn stopped(&mut self) -> Result<(), ServerError> {
        join(&mut self.task).await?;
        Err(ServerError::Stopped)
    }
}

async fn join<F>(task: F) -> Result<(), ServerError>
where
    F: std::future::Future<Output = Result<Result<(), ServerError>, tokio::task::JoinError>>,
{
    task.await.map_err(|e| ServerError::Task(e.to_string()))?
}

fn engine_for(settings: &ChaosSettings) -> ChaosEngine {
    let config = settings.to_chaos_config();
    match settings.seed {
        Some(seed) => ChaosEngine::seeded(config, seed),
        None => ChaosEngine::new(config),
    }
}
