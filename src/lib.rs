//! Fault-injecting HTTP reverse proxy library.

pub mod chaos;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use chaos::{ChaosConfig, ChaosEngine, Decision};
pub use config::schema::ProxyConfig;
pub use http::ChaosServer;
pub use lifecycle::{Orchestrator, OrchestratorState};
