//! Connection task tracking.
//!
//! # Responsibilities
//! - Give every accepted connection an id for tracing
//! - Own the connection tasks of one server instance
//! - Force-close whatever is left when a drain times out

use std::future::Future;

use tokio::task::JoinSet;
use tracing::Instrument;

/// Identifier of a connection within one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The live connection tasks of a server instance.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    tasks: JoinSet<()>,
    next_id: u64,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a connection future as its own task.
    pub fn spawn<F>(&mut self, connection: F) -> ConnectionId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.tasks
            .spawn(connection.instrument(tracing::debug_span!("connection", id = %id)));
        id
    }

    /// Number of connections still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next connection to finish. Pending forever when empty.
    pub async fn reap(&mut self) {
        match self.tasks.join_next().await {
            Some(Err(e)) if e.is_panic() => tracing::error!(error = %e, "Connection task panicked"),
            Some(_) => {}
            None => std::future::pending().await,
        }
    }

    /// Abort every remaining connection and wait for the tasks to unwind.
    pub async fn close_all(&mut self) -> usize {
        let remaining = self.tasks.len();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn connection_ids_are_sequential() {
        let mut set = ConnectionSet::new();
        let a = set.spawn(async {});
        let b = set.spawn(async {});
        assert_ne!(a, b);
        assert_eq!(b.as_u64(), a.as_u64() + 1);
        assert_eq!(a.to_string(), "conn-1");
    }

    #[tokio::test]
    async fn reap_collects_finished_connections() {
        let mut set = ConnectionSet::new();
        set.spawn(async {});
        assert_eq!(set.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), set.reap()).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn close_all_aborts_hung_connections() {
        let mut set = ConnectionSet::new();
        set.spawn(std::future::pending());
        set.spawn(std::future::pending());

        let closed = tokio::time::timeout(Duration::from_secs(1), set.close_all())
            .await
            .unwrap();
        assert_eq!(closed, 2);
        assert!(set.is_empty());
    }
}
