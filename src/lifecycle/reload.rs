//! Hot reload orchestration.
//!
//! Owns the single live [`ServerInstance`] and multiplexes three events:
//! termination, reload triggers, and the instance dying on its own.
//!
//! ```text
//! NoInstance ──start──▶ Serving(n) ──trigger──▶ Draining(n) ──load ok──▶ Serving(n+1)
//!                           │                       └──load failed──▶ Serving(n+1), old snapshot
//!                           └──terminate──▶ Draining(n) ──▶ Terminated
//! ```
//!
//! A new instance is only started after the previous one has fully drained,
//! so two instances never hold the listen address at the same time.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::{ConfigError, ConfigSource, ProxyConfig};
use crate::http::ServerError;
use crate::lifecycle::instance::ServerInstance;
use crate::observability::metrics;

/// Externally visible orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    NoInstance,
    Serving { generation: u64, addr: SocketAddr },
    Draining { generation: u64 },
    Terminated,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

enum Event {
    Terminate,
    Reload,
    Stopped(Result<(), ServerError>),
}

pub struct Orchestrator<S> {
    source: S,
    state: watch::Sender<OrchestratorState>,
}

impl<S: ConfigSource> Orchestrator<S> {
    pub fn new(source: S) -> Self {
        let (state, _) = watch::channel(OrchestratorState::NoInstance);
        Self { source, state }
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Load the initial snapshot and run until `terminate` resolves.
    ///
    /// An invalid initial configuration is fatal.
    pub async fn run<F>(
        self,
        reloads: Option<mpsc::Receiver<()>>,
        terminate: F,
    ) -> Result<(), OrchestratorError>
    where
        F: Future<Output = ()>,
    {
        let initial = self.source.load()?;
        self.run_with(initial, reloads, terminate).await
    }

    /// Run starting from an already loaded snapshot.
    pub async fn run_with<F>(
        self,
        initial: ProxyConfig,
        mut reloads: Option<mpsc::Receiver<()>>,
        terminate: F,
    ) -> Result<(), OrchestratorError>
    where
        F: Future<Output = ()>,
    {
        let result = self.serve(initial, &mut reloads, terminate).await;
        self.state.send_replace(OrchestratorState::Terminated);
        result
    }

    async fn serve<F>(
        &self,
        initial: ProxyConfig,
        reloads: &mut Option<mpsc::Receiver<()>>,
        terminate: F,
    ) -> Result<(), OrchestratorError>
    where
        F: Future<Output = ()>,
    {
        let mut current = initial;
        let mut generation = 0;
        let mut instance = self.start(&current, &mut generation).await?;
        tokio::pin!(terminate);

        loop {
            let event = tokio::select! {
                _ = &mut terminate => Event::Terminate,
                _ = next_reload(reloads) => Event::Reload,
                result = instance.stopped() => Event::Stopped(result),
            };

            match event {
                Event::Terminate => {
                    tracing::info!("Shutdown signal received, stopping server");
                    self.drain(instance).await;
                    return Ok(());
                }
                Event::Reload => {
                    tracing::info!("Reloading configuration");
                    self.drain(instance).await;
                    // The file is read after the drain; earlier triggers are already covered.
                    discard_pending(reloads);
                    instance = self.restart(&mut current, &mut generation).await?;
                }
                Event::Stopped(result) => {
                    tracing::error!(generation = instance.generation(), "Server stopped unexpectedly");
                    return result.map_err(OrchestratorError::from);
                }
            }
        }
    }

    async fn start(
        &self,
        config: &ProxyConfig,
        generation: &mut u64,
    ) -> Result<ServerInstance, ServerError> {
        let instance = ServerInstance::start(config, *generation + 1).await?;
        *generation = instance.generation();
        self.state.send_replace(OrchestratorState::Serving {
            generation: instance.generation(),
            addr: instance.local_addr(),
        });
        Ok(instance)
    }

    /// Load a new snapshot and start it; fall back to `current` on any failure.
    async fn restart(
        &self,
        current: &mut ProxyConfig,
        generation: &mut u64,
    ) -> Result<ServerInstance, ServerError> {
        match self.source.load() {
            Ok(candidate) => match self.start(&candidate, generation).await {
                Ok(instance) => {
                    tracing::info!(generation = instance.generation(), "Configuration reloaded successfully");
                    metrics::record_reload("applied");
                    *current = candidate;
                    return Ok(instance);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start server with reloaded config");
                    metrics::record_reload("start_failed");
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config");
                metrics::record_reload("rejected");
            }
        }

        tracing::info!("Keeping previous configuration");
        self.start(current, generation).await
    }

    async fn drain(&self, instance: ServerInstance) {
        let generation = instance.generation();
        self.state
            .send_replace(OrchestratorState::Draining { generation });
        if let Err(e) = instance.drain().await {
            tracing::error!(generation, error = %e, "Server shutdown error");
        }
    }
}

/// Next reload trigger. Pending forever once the trigger source is gone.
async fn next_reload(reloads: &mut Option<mpsc::Receiver<()>>) {
    loop {
        let Some(rx) = reloads.as_mut() else {
            return std::future::pending().await;
        };
        if rx.recv().await.is_some() {
            return;
        }
        tracing::warn!("Reload trigger source closed, hot reload disabled");
        *reloads = None;
    }
}

fn discard_pending(reloads: &mut Option<mpsc::Receiver<()>>) {
    if let Some(rx) = reloads.as_mut() {
        while rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Hands out queued configs; once the queue is empty repeats the last result.
    #[derive(Clone, Default)]
    struct QueuedSource {
        queue: Arc<Mutex<Vec<Result<ProxyConfig, String>>>>,
        loads: Arc<Mutex<usize>>,
    }

    impl QueuedSource {
        fn push(&self, item: Result<ProxyConfig, String>) {
            self.queue.lock().unwrap().insert(0, item);
        }

        fn loads(&self) -> usize {
            *self.loads.lock().unwrap()
        }
    }

    impl ConfigSource for QueuedSource {
        fn load(&self) -> Result<ProxyConfig, ConfigError> {
            *self.loads.lock().unwrap() += 1;
            let mut queue = self.queue.lock().unwrap();
            let item = if queue.len() > 1 {
                queue.pop().unwrap()
            } else {
                queue.last().cloned().expect("source queue empty")
            };
            item.map_err(|e| ConfigError::Io(std::io::Error::other(e)))
        }
    }

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config.upstream.url = "http://127.0.0.1:1".into();
        config.timeouts.shutdown_grace_secs = 1;
        config
    }

    async fn wait_for(
        state: &mut watch::Receiver<OrchestratorState>,
        predicate: impl Fn(&OrchestratorState) -> bool,
    ) -> OrchestratorState {
        let found = tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for orchestrator state")
            .expect("orchestrator dropped");
        *found
    }

    #[tokio::test]
    async fn invalid_initial_config_is_fatal() {
        let source = QueuedSource::default();
        source.push(Err("missing upstream".into()));

        let result = Orchestrator::new(source)
            .run(None, std::future::pending())
            .await;
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[tokio::test]
    async fn terminate_drains_and_stops() {
        let source = QueuedSource::default();
        source.push(Ok(config()));

        let orchestrator = Orchestrator::new(source);
        let mut state = orchestrator.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(orchestrator.run(None, async {
            let _ = stop_rx.await;
        }));

        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { generation: 1, .. })).await;
        stop_tx.send(()).unwrap();

        run.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), OrchestratorState::Terminated);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_config() {
        let source = QueuedSource::default();
        source.push(Ok(config()));
        source.push(Err("bad file".into()));

        let orchestrator = Orchestrator::new(source.clone());
        let mut state = orchestrator.subscribe();
        let (reload_tx, reload_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(orchestrator.run(Some(reload_rx), async {
            let _ = stop_rx.await;
        }));

        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { generation: 1, .. })).await;
        reload_tx.send(()).await.unwrap();
        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { generation: 2, .. })).await;
        assert_eq!(source.loads(), 2);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn triggers_queued_during_drain_collapse_into_one_reload() {
        let source = QueuedSource::default();
        source.push(Ok(config()));

        let orchestrator = Orchestrator::new(source.clone());
        let mut state = orchestrator.subscribe();
        let (reload_tx, reload_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(orchestrator.run(Some(reload_rx), async {
            let _ = stop_rx.await;
        }));

        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { generation: 1, .. })).await;
        for _ in 0..3 {
            reload_tx.try_send(()).unwrap();
        }
        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { generation: 2, .. })).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(matches!(*state.borrow(), OrchestratorState::Serving { generation: 2, .. }));
        assert_eq!(source.loads(), 2);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_trigger_source_keeps_serving() {
        let source = QueuedSource::default();
        source.push(Ok(config()));

        let orchestrator = Orchestrator::new(source.clone());
        let mut state = orchestrator.subscribe();
        let (reload_tx, reload_rx) = mpsc::channel(1);
        drop(reload_tx);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(orchestrator.run(Some(reload_rx), async {
            let _ = stop_rx.await;
        }));

        wait_for(&mut state, |s| matches!(s, OrchestratorState::Serving { .. })).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(*state.borrow(), OrchestratorState::Serving { generation: 1, .. }));
        assert_eq!(source.loads(), 1);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unbindable_initial_address_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.listener.bind_address = taken.local_addr().unwrap().to_string();

        let source = QueuedSource::default();
        source.push(Ok(config));

        let result = Orchestrator::new(source)
            .run(None, std::future::pending())
            .await;
        assert!(matches!(result, Err(OrchestratorError::Server(_))));
    }
}
