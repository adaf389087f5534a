//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, request id)
//!     → middleware/access_log.rs (one event per request)
//!     → middleware/chaos.rs (drop / latency / error / corrupt)
//!     → forward.rs (rewrite toward the upstream, send, stream back)
//!     → Send to client
//! ```

pub mod forward;
pub mod middleware;
pub mod server;

pub use forward::UpstreamForwarder;
pub use server::{build_router, ChaosServer, ServerError};
