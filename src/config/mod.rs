//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize, apply overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable snapshot)
//!     → one snapshot per server instance
//!
//! On file change:
//!     watcher.rs emits a reload trigger
//!     → orchestrator drains the live instance
//!     → loader.rs loads new config (previous snapshot kept on failure)
//!     → a new instance is built from the winning snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a full restart of the instance
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError, ConfigSource, FileConfigSource, Overrides};
pub use schema::{
    ChaosSettings, ListenerConfig, ObservabilityConfig, ProxyConfig, TimeoutConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigWatcher, WatchError};
