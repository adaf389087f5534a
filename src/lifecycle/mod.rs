//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (reload.rs):
//!     Load config → Validate → Start instance (instance.rs)
//!
//! Reload (reload.rs):
//!     Trigger (watcher or SIGHUP) → Drain instance → Load config
//!     → Start new instance, or restart the previous snapshot on failure
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Drain and terminate
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Exactly one instance owns the listen address at any time
//! - Drain has a deadline: connections still open after it are aborted
//! - An invalid initial config is fatal; an invalid reloaded config is not

pub mod instance;
pub mod reload;
pub mod signals;

pub use instance::ServerInstance;
pub use reload::{Orchestrator, OrchestratorError, OrchestratorState};
pub use signals::{forward_sighup, shutdown_signal};
