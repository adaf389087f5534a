//! Fault injection core.
//!
//! # Data Flow
//! ```text
//! ChaosSettings (config file)
//!     → ChaosConfig (durations, rates)
//!     → engine.rs: ChaosEngine::decide() → Decision per request
//!     → http pipeline applies the Decision
//!     → corruption.rs mangles buffered bodies when Decision.corrupt is set
//! ```
//!
//! # Design Decisions
//! - No I/O here; everything is a function of config + random source
//! - One engine per server instance, shared read-only via Arc
//! - Randomness is injectable (seeded StdRng) so behavior is reproducible in tests

pub mod corruption;
pub mod engine;

pub use corruption::{Corrupted, Strategy};
pub use engine::{ChaosConfig, ChaosEngine, Decision, DEFAULT_ERROR_CODE};
